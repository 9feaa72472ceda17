use crate::error::{CarnError, Result};
use crate::io::StateDict;
use crate::nn::{Conv2d, Module, PixelShuffle, ReLU, Sequential};
use crate::tensor::Tensor;

/// Integer-factor spatial upscaling by sub-pixel convolution.
///
/// Powers of two use `log2(scale)` stages of a 3x3 convolution to `4 * n_feats`
/// channels followed by a 2x pixel shuffle; scale 3 uses a single stage to
/// `9 * n_feats` channels and a 3x shuffle. Each stage optionally ends in a
/// ReLU. State-dict keys follow the flat stage layout (`0.weight`, `2.weight`, ...).
pub struct Upsampler {
    body: Sequential,
    scale: usize,
}

impl Upsampler {
    /// Fails with [`CarnError::UnsupportedScale`] unless `scale` is 3 or a power of two.
    pub fn check_scale(scale: usize) -> Result<()> {
        if scale == 3 || scale.is_power_of_two() {
            Ok(())
        } else {
            Err(CarnError::UnsupportedScale(scale))
        }
    }

    /// The scale is validated before any layer is allocated.
    pub fn new(scale: usize, n_feats: usize, act: bool, groups: usize) -> Result<Self> {
        Self::check_scale(scale)?;

        let (stages, factor) = if scale == 3 {
            (1, 3)
        } else {
            (scale.trailing_zeros(), 2)
        };

        let mut builder = Sequential::builder();
        for _ in 0..stages {
            let expand = Conv2d::same(n_feats, factor * factor * n_feats, 3, groups)?;
            builder = builder
                .add_unnamed(Box::new(expand))
                .add_unnamed(Box::new(PixelShuffle::new(factor)));
            if act {
                builder = builder.add_unnamed(Box::new(ReLU));
            }
        }
        log::debug!("Upsampler x{scale}: {stages} stage(s) of x{factor}, act={act}");

        Ok(Upsampler {
            body: builder.build(),
            scale,
        })
    }

    pub fn scale(&self) -> usize {
        self.scale
    }

    /// Number of layers in the stage stack
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl Module for Upsampler {
    fn forward(&self, x: &Tensor) -> Tensor {
        self.body.forward(x)
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.body.parameters()
    }

    fn state_dict(&self) -> StateDict {
        self.body.state_dict()
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        self.body.load_state_dict(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{RawTensor, TensorOps};

    #[test]
    fn test_scale_four_doubles_twice() {
        let up = Upsampler::new(4, 8, false, 4).unwrap();
        assert_eq!(up.len(), 4);
        let y = up.forward(&RawTensor::randn(&[1, 8, 3, 5]));
        assert_eq!(y.shape(), vec![1, 8, 12, 20]);
    }

    #[test]
    fn test_scale_three_single_stage() {
        let up = Upsampler::new(3, 4, true, 1).unwrap();
        assert_eq!(up.len(), 3);
        let y = up.forward(&RawTensor::randn(&[2, 4, 2, 2]));
        assert_eq!(y.shape(), vec![2, 4, 6, 6]);
        assert!(y.to_vec().iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_scale_two_with_activation() {
        let up = Upsampler::new(2, 4, true, 2).unwrap();
        assert_eq!(up.len(), 3);
        assert_eq!(up.num_parameters(), 16 * 2 * 9 + 16);
    }

    #[test]
    fn test_scale_one_is_identity() {
        let up = Upsampler::new(1, 4, false, 1).unwrap();
        assert!(up.is_empty());
        let x = RawTensor::randn(&[1, 4, 3, 3]);
        assert_eq!(up.forward(&x).to_vec(), x.to_vec());
    }

    #[test]
    fn test_unsupported_scales_fail_fast() {
        for scale in [0, 5, 6, 7, 12] {
            assert_eq!(
                Upsampler::new(scale, 64, false, 4).err(),
                Some(CarnError::UnsupportedScale(scale))
            );
        }
    }

    #[test]
    fn test_state_dict_keys_match_stage_layout() {
        let up = Upsampler::new(4, 4, false, 1).unwrap();
        let keys: Vec<String> = up.state_dict().into_keys().collect();
        assert_eq!(keys, vec!["0.bias", "0.weight", "2.bias", "2.weight"]);
    }
}
