use crate::error::Result;
use crate::io::{StateDict, insert_prefixed, sub_state};
use crate::nn::{Conv2d, Module, ReLU};
use crate::ops::cat;
use crate::tensor::Tensor;

/// The fusion half of the cascading pattern.
///
/// Stage `k` (1-based) runs a block on the previous stage's output, appends
/// the result to a running channel concatenation that started with the
/// stage-0 input, and fuses the `(k + 1) * n_feats` channels back to
/// `n_feats` with a 1x1 convolution and a ReLU. The blocks themselves are
/// owned by the caller, so the same pattern serves a block applied repeatedly
/// and a list of distinct blocks.
///
/// Fusion layers are keyed `c1`, `c2`, ... in the state dict.
pub struct Cascade {
    fusions: Vec<Conv2d>,
    act: ReLU,
}

impl Cascade {
    pub fn new(n_feats: usize, stages: usize) -> Result<Self> {
        let fusions = (1..=stages)
            .map(|k| Conv2d::same((k + 1) * n_feats, n_feats, 1, 1))
            .collect::<Result<Vec<_>>>()?;
        Ok(Cascade { fusions, act: ReLU })
    }

    pub fn stages(&self) -> usize {
        self.fusions.len()
    }

    /// Input channel count of each fusion convolution, in stage order
    pub fn in_channels(&self) -> Vec<usize> {
        self.fusions.iter().map(Conv2d::in_channels).collect()
    }

    /// Run the cascade; `block(stage, x)` is called once per stage, 0-based.
    pub fn forward<F>(&self, x: &Tensor, mut block: F) -> Tensor
    where
        F: FnMut(usize, &Tensor) -> Tensor,
    {
        let mut concat = x.clone();
        let mut out = x.clone();
        for (stage, fusion) in self.fusions.iter().enumerate() {
            let b = block(stage, &out);
            concat = cat(&[concat, b], 1);
            out = self.act.forward(&fusion.forward(&concat));
        }
        out
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        self.fusions.iter().flat_map(|f| f.parameters()).collect()
    }

    /// Fusion weights, merged into the owner's state dict
    pub fn extend_state_dict(&self, state: &mut StateDict) {
        for (k, fusion) in self.fusions.iter().enumerate() {
            insert_prefixed(state, &format!("c{}", k + 1), fusion.state_dict());
        }
    }

    pub fn load_state_dict(&mut self, state: &StateDict) {
        for (k, fusion) in self.fusions.iter_mut().enumerate() {
            fusion.load_state_dict(&sub_state(state, &format!("c{}", k + 1)));
        }
    }
}
