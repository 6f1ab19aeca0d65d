pub mod console;
pub mod freelist;

pub use console::LineBuffer;
pub use freelist::Freelist;
