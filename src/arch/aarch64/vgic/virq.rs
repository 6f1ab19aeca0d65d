//! Per-vCPU virtual IRQ state
//!
//! Each vCPU owns a handle per SGI/PPI, a shadow of the list registers
//! it has handed to the kernel and an overflow ring of IRQs waiting for a
//! free list register.

use crate::virq::VirqAck;

/// List registers available per vCPU
pub const NUM_LIST_REGS: usize = 4;
/// SGIs and PPIs, banked per vCPU
pub const NUM_LOCAL_VIRQS: usize = 32;
/// Shared peripheral interrupts the VMM can track
pub const NUM_VSPIS: usize = 200;
/// Overflow ring capacity (one slot is kept free)
pub const IRQ_QUEUE_SIZE: usize = 64;

/// A registered virtual IRQ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirqHandle {
    pub virq: u32,
    pub ack: VirqAck,
}

/// Ring of IRQs waiting for a list register
#[derive(Debug)]
pub struct IrqQueue {
    irqs: [Option<VirqHandle>; IRQ_QUEUE_SIZE],
    head: usize,
    tail: usize,
}

impl IrqQueue {
    pub const fn new() -> Self {
        Self {
            irqs: [None; IRQ_QUEUE_SIZE],
            head: 0,
            tail: 0,
        }
    }

    fn next(i: usize) -> usize {
        (i + 1) & (IRQ_QUEUE_SIZE - 1)
    }

    pub fn is_full(&self) -> bool {
        Self::next(self.tail) == self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn len(&self) -> usize {
        (self.tail + IRQ_QUEUE_SIZE - self.head) & (IRQ_QUEUE_SIZE - 1)
    }

    /// Append `virq`. Returns `false` when the ring is full.
    pub fn enqueue(&mut self, virq: VirqHandle) -> bool {
        if self.is_full() {
            return false;
        }
        self.irqs[self.tail] = Some(virq);
        self.tail = Self::next(self.tail);
        true
    }

    pub fn dequeue(&mut self) -> Option<VirqHandle> {
        if self.is_empty() {
            return None;
        }
        let virq = self.irqs[self.head].take();
        self.head = Self::next(self.head);
        virq
    }
}

impl Default for IrqQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Virtual IRQ state of one vCPU
#[derive(Debug)]
pub struct VgicVcpu {
    pub local_virqs: [Option<VirqHandle>; NUM_LOCAL_VIRQS],
    /// What each list register currently presents to the guest
    pub lr_shadow: [Option<VirqHandle>; NUM_LIST_REGS],
    pub irq_queue: IrqQueue,
}

impl VgicVcpu {
    pub const fn new() -> Self {
        Self {
            local_virqs: [None; NUM_LOCAL_VIRQS],
            lr_shadow: [None; NUM_LIST_REGS],
            irq_queue: IrqQueue::new(),
        }
    }

    /// First list register not holding an IRQ.
    pub fn free_lr(&self) -> Option<usize> {
        self.lr_shadow.iter().position(Option::is_none)
    }

    /// Whether `irq` sits in a list register.
    pub fn in_lr(&self, irq: u32) -> bool {
        self.lr_shadow.iter().flatten().any(|h| h.virq == irq)
    }
}

impl Default for VgicVcpu {
    fn default() -> Self {
        Self::new()
    }
}
