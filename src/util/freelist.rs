//! Fixed-capacity index arena
//!
//! Free indices form a chain through `next`; allocation pops the head, so
//! indices are handed out in order `0..N`. Registrations live for the
//! lifetime of the VMM, so an index is never given back.

pub struct Freelist<const N: usize> {
    next: [Option<usize>; N],
    head: Option<usize>,
}

impl<const N: usize> Freelist<N> {
    pub fn new() -> Self {
        let mut next = [None; N];
        for (i, link) in next.iter_mut().enumerate() {
            if i + 1 < N {
                *link = Some(i + 1);
            }
        }
        Self {
            next,
            head: if N > 0 { Some(0) } else { None },
        }
    }

    pub fn alloc(&mut self) -> Option<usize> {
        let idx = self.head?;
        self.head = self.next[idx].take();
        Some(idx)
    }
}

impl<const N: usize> Default for Freelist<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_in_order() {
        let mut fl: Freelist<3> = Freelist::new();
        assert_eq!(fl.alloc(), Some(0));
        assert_eq!(fl.alloc(), Some(1));
        assert_eq!(fl.alloc(), Some(2));
        assert_eq!(fl.alloc(), None);
    }

    #[test]
    fn test_empty_arena() {
        let mut fl: Freelist<0> = Freelist::new();
        assert_eq!(fl.alloc(), None);
    }
}
