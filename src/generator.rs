//! Payload size generators.
//!
//! The rate clock asks a generator for the size of every message it schedules,
//! which keeps the pacing logic independent of the size distribution.

use crate::cli::SizeDistribution;

/// Supplies the size in bytes of the next payload.
pub trait MessageGenerator: Send + 'static {
    fn next_size(&mut self) -> usize;
}

/// Every message has the same size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformSizeGenerator {
    message_size: usize,
}

impl UniformSizeGenerator {
    pub fn new(message_size: usize) -> Self {
        Self { message_size }
    }
}

impl MessageGenerator for UniformSizeGenerator {
    fn next_size(&mut self) -> usize {
        self.message_size
    }
}

/// Cycles through a fixed list of sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSizeGenerator {
    sizes: Vec<usize>,
    position: usize,
}

impl SequenceSizeGenerator {
    /// An empty list behaves like a generator of zero-sized messages.
    pub fn new(sizes: Vec<usize>) -> Self {
        Self { sizes, position: 0 }
    }
}

impl MessageGenerator for SequenceSizeGenerator {
    fn next_size(&mut self) -> usize {
        if self.sizes.is_empty() {
            return 0;
        }
        let size = self.sizes[self.position % self.sizes.len()];
        self.position += 1;
        size
    }
}

/// Build the generator selected on the command line.
pub fn create_generator(
    distribution: SizeDistribution,
    message_size: usize,
) -> Box<dyn MessageGenerator> {
    match distribution {
        SizeDistribution::Uniform => Box::new(UniformSizeGenerator::new(message_size)),
    }
}

impl MessageGenerator for Box<dyn MessageGenerator> {
    fn next_size(&mut self) -> usize {
        (**self).next_size()
    }
}
