use crate::io::StateDict;
use crate::nn::Module;
use crate::profile::{self, LayerCost};
use crate::tensor::{Tensor, TensorOps};

/// `PixelShuffle`: rearranges (B, C*r², H, W) into (B, C, H*r, W*r).
///
/// Sub-pixel upscaling as in ESPCN (Shi et al., 2016):
/// `out[b, c, h*r + i, w*r + j] = in[b, c*r*r + i*r + j, h, w]`.
///
/// # Examples
/// ```
/// use ecarn::{RawTensor, PixelShuffle, Module, TensorOps};
///
/// let layer = PixelShuffle::new(2);
/// let input = RawTensor::randn(&[1, 12, 4, 4]);
/// let output = layer.forward(&input);
/// assert_eq!(output.shape(), vec![1, 3, 8, 8]);
/// ```
pub struct PixelShuffle {
    upscale_factor: usize,
}

impl PixelShuffle {
    /// # Panics
    /// Panics if `upscale_factor` is 0
    #[must_use]
    pub fn new(upscale_factor: usize) -> Self {
        assert!(
            upscale_factor > 0,
            "PixelShuffle: upscale_factor must be positive, got {upscale_factor}",
        );
        PixelShuffle { upscale_factor }
    }

    pub fn upscale_factor(&self) -> usize {
        self.upscale_factor
    }
}

impl Module for PixelShuffle {
    fn forward(&self, x: &Tensor) -> Tensor {
        let shape = x.shape();
        assert_eq!(
            shape.len(),
            4,
            "PixelShuffle: expected 4D input (B, C, H, W), got shape {shape:?}",
        );

        let (batch, in_channels, height, width) = (shape[0], shape[1], shape[2], shape[3]);
        let r = self.upscale_factor;
        assert_eq!(
            in_channels % (r * r),
            0,
            "PixelShuffle: input channels ({in_channels}) must be divisible by upscale_factor² ({})",
            r * r
        );
        let out_channels = in_channels / (r * r);

        // (B, C*r², H, W) → (B, C, r, r, H, W) → (B, C, H, r, W, r) → (B, C, H*r, W*r)
        let out = x
            .reshape(&[batch, out_channels, r, r, height, width])
            .permute(&[0, 1, 4, 2, 5, 3])
            .reshape(&[batch, out_channels, height * r, width * r]);

        if profile::is_recording() {
            profile::record(LayerCost {
                kind: "PixelShuffle",
                input_shape: shape,
                output_shape: out.shape(),
                params: 0,
                madds: 0,
                flops: 0,
            });
        }
        out
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }

    fn state_dict(&self) -> StateDict {
        StateDict::new()
    }

    fn load_state_dict(&mut self, _state: &StateDict) {}
}
