use crate::io::StateDict;
use crate::tensor::Tensor;

pub mod layers;

pub use layers::{Conv2d, PixelShuffle, ReLU, Sequential, SequentialBuilder};

/// A layer or composition of layers with registered parameters.
///
/// `forward` panics on inputs the underlying tensor ops reject (wrong rank,
/// channel mismatch); fallible entry points live on the concrete models.
pub trait Module {
    fn forward(&self, x: &Tensor) -> Tensor;

    /// Every parameter exactly once, including frozen ones.
    ///
    /// A sub-module applied several times still contributes its parameters once.
    fn parameters(&self) -> Vec<Tensor>;

    fn state_dict(&self) -> StateDict;
    fn load_state_dict(&mut self, state: &StateDict);

    /// Total number of scalar parameters
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.borrow().data.len()).sum()
    }

    /// Number of scalar parameters that receive gradients
    fn num_trainable_parameters(&self) -> usize {
        let params = self.parameters();
        params
            .iter()
            .map(|p| p.borrow())
            .filter(|p| p.requires_grad)
            .map(|p| p.data.len())
            .sum()
    }
}
