use crate::error::Result;
use crate::io::{StateDict, insert_prefixed, sub_state};
use crate::nn::Module;
use crate::tensor::Tensor;

use super::{Cascade, EResidualBlock};

/// Cascading residual block: a single [`EResidualBlock`] applied three times,
/// with a growing concatenation fused after each application.
///
/// The block's weights are shared across the three applications, so the
/// gradient of each block parameter is the sum of its three uses.
pub struct Carb {
    b: EResidualBlock,
    cascade: Cascade,
}

impl Carb {
    pub const STAGES: usize = 3;

    pub fn new(n_feats: usize, kernel_size: usize, groups: usize) -> Result<Self> {
        Ok(Carb {
            b: EResidualBlock::new(n_feats, kernel_size, groups)?,
            cascade: Cascade::new(n_feats, Self::STAGES)?,
        })
    }

    /// `[2n, 3n, 4n]` for `n` features
    pub fn fusion_in_channels(&self) -> Vec<usize> {
        self.cascade.in_channels()
    }

    pub fn block(&self) -> &EResidualBlock {
        &self.b
    }
}

impl Module for Carb {
    fn forward(&self, x: &Tensor) -> Tensor {
        self.cascade.forward(x, |_, t| self.b.forward(t))
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = self.b.parameters();
        params.extend(self.cascade.parameters());
        params
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        insert_prefixed(&mut state, "b", self.b.state_dict());
        self.cascade.extend_state_dict(&mut state);
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        self.b.load_state_dict(&sub_state(state, "b"));
        self.cascade.load_state_dict(state);
    }
}
