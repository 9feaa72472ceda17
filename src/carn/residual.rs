use crate::error::Result;
use crate::io::{StateDict, insert_prefixed, sub_state};
use crate::nn::{Conv2d, Module, ReLU};
use crate::tensor::{Tensor, TensorOps};

/// Efficient residual block: two grouped k x k convolutions, a 1x1 pointwise
/// mix across all channels, and an identity skip.
///
/// `relu(conv3(relu(conv2(relu(conv1(x))))) + x)`
pub struct EResidualBlock {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    act: ReLU,
}

impl EResidualBlock {
    pub fn new(n_feats: usize, kernel_size: usize, groups: usize) -> Result<Self> {
        Ok(EResidualBlock {
            conv1: Conv2d::same(n_feats, n_feats, kernel_size, groups)?,
            conv2: Conv2d::same(n_feats, n_feats, kernel_size, groups)?,
            conv3: Conv2d::same(n_feats, n_feats, 1, 1)?,
            act: ReLU,
        })
    }

    pub fn n_feats(&self) -> usize {
        self.conv3.out_channels()
    }
}

impl Module for EResidualBlock {
    fn forward(&self, x: &Tensor) -> Tensor {
        let out = self.act.forward(&self.conv1.forward(x));
        let out = self.act.forward(&self.conv2.forward(&out));
        let out = self.conv3.forward(&out);
        self.act.forward(&out.add(x))
    }

    fn parameters(&self) -> Vec<Tensor> {
        [&self.conv1, &self.conv2, &self.conv3]
            .iter()
            .flat_map(|c| c.parameters())
            .collect()
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        insert_prefixed(&mut state, "conv1", self.conv1.state_dict());
        insert_prefixed(&mut state, "conv2", self.conv2.state_dict());
        insert_prefixed(&mut state, "conv3", self.conv3.state_dict());
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        self.conv1.load_state_dict(&sub_state(state, "conv1"));
        self.conv2.load_state_dict(&sub_state(state, "conv2"));
        self.conv3.load_state_dict(&sub_state(state, "conv3"));
    }
}
