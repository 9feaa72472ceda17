use crate::config::CarnConfig;
use crate::error::{CarnError, Result};
use crate::io::{StateDict, insert_prefixed, sub_state};
use crate::nn::{Conv2d, Module, Sequential};
use crate::tensor::{Tensor, TensorOps};

use super::{Carb, Cascade, MeanShift, Upsampler};

/// The E-CARN super-resolution network.
///
/// ```text
/// x -> sub_mean -> head (3x3, 3 -> n)
///   -> cascade over three CARBs (b1, b2, b3) with fusions c1, c2, c3
///   -> tail: Upsampler(scale, n, no act, groups) -> 3x3 conv n -> 3
///   -> add_mean
/// ```
///
/// Input is `(N, 3, H, W)` RGB in 0..255; output is `(N, 3, H * scale, W * scale)`.
/// State-dict keys follow the layout `sub_mean.*`, `head.*`, `b1.b.conv1.*`,
/// `c1.*`, `tail.0.0.*` (first upsampler conv), `tail.1.*`, `add_mean.*`.
///
/// [`ECarn::new`] is the fixed architecture and takes no settings. Variants
/// (feature width, groups, scale, colour statistics) are only reachable
/// through [`ECarn::with_config`], which validates the [`CarnConfig`] before
/// building any layer.
pub struct ECarn {
    config: CarnConfig,
    sub_mean: MeanShift,
    head: Conv2d,
    blocks: Vec<Carb>,
    cascade: Cascade,
    tail: Sequential,
    add_mean: MeanShift,
}

impl ECarn {
    pub const BLOCKS: usize = 3;

    /// The fixed configuration: 64 features, 4 groups, 4x upscaling.
    pub fn new() -> Result<Self> {
        Self::with_config(&CarnConfig::default())
    }

    pub fn with_config(config: &CarnConfig) -> Result<Self> {
        config.validate()?;
        let CarnConfig {
            n_colors,
            n_feats,
            kernel_size,
            scale,
            group,
            rgb_mean,
            rgb_std,
        } = *config;

        let blocks = (0..Self::BLOCKS)
            .map(|_| Carb::new(n_feats, kernel_size, group))
            .collect::<Result<Vec<_>>>()?;

        let tail = Sequential::builder()
            .add_unnamed(Box::new(Upsampler::new(scale, n_feats, false, group)?))
            .add_unnamed(Box::new(Conv2d::same(n_feats, n_colors, kernel_size, 1)?))
            .build();

        let net = ECarn {
            config: config.clone(),
            sub_mean: MeanShift::sub(rgb_mean, rgb_std)?,
            head: Conv2d::same(n_colors, n_feats, kernel_size, 1)?,
            blocks,
            cascade: Cascade::new(n_feats, Self::BLOCKS)?,
            tail,
            add_mean: MeanShift::add(rgb_mean, rgb_std)?,
        };
        log::debug!(
            "built ECarn x{scale}: n_feats={n_feats}, group={group}, {} params ({} trainable)",
            net.num_parameters(),
            net.num_trainable_parameters()
        );
        Ok(net)
    }

    pub fn config(&self) -> &CarnConfig {
        &self.config
    }

    pub fn scale(&self) -> usize {
        self.config.scale
    }

    pub fn blocks(&self) -> &[Carb] {
        &self.blocks
    }

    /// Fusion input widths of the network-level cascade
    pub fn fusion_in_channels(&self) -> Vec<usize> {
        self.cascade.in_channels()
    }

    /// [`Module::forward`] with the input shape checked up front.
    pub fn try_forward(&self, x: &Tensor) -> Result<Tensor> {
        let shape = x.shape();
        let valid = shape.len() == 4
            && shape[1] == self.config.n_colors
            && shape.iter().all(|&d| d > 0);
        if !valid {
            return Err(CarnError::InputShape {
                expected_channels: self.config.n_colors,
                shape,
            });
        }
        Ok(self.forward(x))
    }
}

impl Module for ECarn {
    fn forward(&self, x: &Tensor) -> Tensor {
        let x = self.sub_mean.forward(x);
        let x = self.head.forward(&x);
        let x = self
            .cascade
            .forward(&x, |stage, t| self.blocks[stage].forward(t));
        let x = self.tail.forward(&x);
        self.add_mean.forward(&x)
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = self.sub_mean.parameters();
        params.extend(self.head.parameters());
        for block in &self.blocks {
            params.extend(block.parameters());
        }
        params.extend(self.cascade.parameters());
        params.extend(self.tail.parameters());
        params.extend(self.add_mean.parameters());
        params
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        insert_prefixed(&mut state, "sub_mean", self.sub_mean.state_dict());
        insert_prefixed(&mut state, "head", self.head.state_dict());
        for (i, block) in self.blocks.iter().enumerate() {
            insert_prefixed(&mut state, &format!("b{}", i + 1), block.state_dict());
        }
        self.cascade.extend_state_dict(&mut state);
        insert_prefixed(&mut state, "tail", self.tail.state_dict());
        insert_prefixed(&mut state, "add_mean", self.add_mean.state_dict());
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        self.sub_mean.load_state_dict(&sub_state(state, "sub_mean"));
        self.head.load_state_dict(&sub_state(state, "head"));
        for (i, block) in self.blocks.iter_mut().enumerate() {
            block.load_state_dict(&sub_state(state, &format!("b{}", i + 1)));
        }
        self.cascade.load_state_dict(state);
        self.tail.load_state_dict(&sub_state(state, "tail"));
        self.add_mean.load_state_dict(&sub_state(state, "add_mean"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::RawTensor;

    fn small() -> ECarn {
        ECarn::with_config(&CarnConfig {
            n_feats: 8,
            scale: 2,
            group: 2,
            ..CarnConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_small_network_upscales() {
        let net = small();
        let y = net.forward(&RawTensor::rand(&[1, 3, 4, 5]));
        assert_eq!(y.shape(), vec![1, 3, 8, 10]);
        assert!(y.to_vec().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_scale_three_network() {
        let net = ECarn::with_config(&CarnConfig {
            n_feats: 4,
            scale: 3,
            group: 1,
            ..CarnConfig::default()
        })
        .unwrap();
        let y = net.forward(&RawTensor::rand(&[1, 3, 2, 3]));
        assert_eq!(y.shape(), vec![1, 3, 6, 9]);
    }

    #[test]
    fn test_invalid_config_is_rejected_before_building() {
        let err = ECarn::with_config(&CarnConfig {
            scale: 5,
            ..CarnConfig::default()
        })
        .err();
        assert_eq!(err, Some(CarnError::UnsupportedScale(5)));
    }

    #[test]
    fn test_try_forward_rejects_bad_shapes() {
        let net = small();
        for shape in [vec![1, 4, 3, 3], vec![3, 3, 3], vec![1, 3, 0, 3]] {
            let x = RawTensor::zeros(&shape);
            assert_eq!(
                net.try_forward(&x).err(),
                Some(CarnError::InputShape {
                    expected_channels: 3,
                    shape
                })
            );
        }
    }

    #[test]
    fn test_state_dict_load_reproduces_output() {
        let src = small();
        let mut dst = small();
        dst.load_state_dict(&src.state_dict());
        let x = RawTensor::rand(&[1, 3, 3, 3]);
        assert_eq!(dst.forward(&x).to_vec(), src.forward(&x).to_vec());
    }
}
