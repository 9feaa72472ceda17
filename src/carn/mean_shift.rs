use crate::error::Result;
use crate::io::StateDict;
use crate::nn::{Conv2d, Module};
use crate::tensor::Tensor;

/// Fixed per-channel affine map on RGB input, as a frozen 1x1 convolution.
///
/// `out_c = x_c / std_c + sign * 255 * mean_c / std_c`
///
/// With `sign = -1` it subtracts the dataset mean (scaled to 0..255 pixel
/// values); with `sign = +1` it adds it back. For unit std the two are exact
/// inverses.
pub struct MeanShift {
    conv: Conv2d,
    sign: f32,
}

impl MeanShift {
    pub fn new(rgb_mean: [f32; 3], rgb_std: [f32; 3], sign: f32) -> Result<Self> {
        let conv = Conv2d::new(3, 3, 1, 1, 0, true)?;
        {
            let mut w = conv.weight().borrow_mut();
            w.data.fill(0.0);
            for (c, std) in rgb_std.iter().enumerate() {
                w.data[c * 3 + c] = 1.0 / std;
            }
        }
        if let Some(bias) = conv.bias() {
            let mut b = bias.borrow_mut();
            for (c, (mean, std)) in rgb_mean.iter().zip(&rgb_std).enumerate() {
                b.data[c] = sign * 255.0 * mean / std;
            }
        }
        conv.set_requires_grad(false);
        log::debug!("MeanShift sign={sign} mean={rgb_mean:?} std={rgb_std:?}");
        Ok(MeanShift { conv, sign })
    }

    /// Mean subtraction, applied before feature extraction
    pub fn sub(rgb_mean: [f32; 3], rgb_std: [f32; 3]) -> Result<Self> {
        Self::new(rgb_mean, rgb_std, -1.0)
    }

    /// Mean re-addition, applied after reconstruction
    pub fn add(rgb_mean: [f32; 3], rgb_std: [f32; 3]) -> Result<Self> {
        Self::new(rgb_mean, rgb_std, 1.0)
    }

    pub fn sign(&self) -> f32 {
        self.sign
    }
}

impl Module for MeanShift {
    fn forward(&self, x: &Tensor) -> Tensor {
        self.conv.forward(x)
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.conv.parameters()
    }

    fn state_dict(&self) -> StateDict {
        self.conv.state_dict()
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        self.conv.load_state_dict(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DIV2K_RGB_MEAN, DIV2K_RGB_STD};
    use crate::tensor::{RawTensor, TensorOps};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_sub_mean_shifts_each_channel() {
        let shift = MeanShift::sub([0.5, 0.25, 0.0], [1.0, 1.0, 1.0]).unwrap();
        let x = RawTensor::constant(200.0, &[1, 3, 2, 2]);
        let y = shift.forward(&x).to_vec();
        for (i, v) in y.iter().enumerate() {
            let expected = [200.0 - 127.5, 200.0 - 63.75, 200.0][i / 4];
            assert_abs_diff_eq!(*v, expected, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_std_scales_input_and_bias() {
        let shift = MeanShift::new([0.2, 0.2, 0.2], [2.0, 4.0, 0.5], 1.0).unwrap();
        let x = RawTensor::constant(10.0, &[1, 3, 1, 1]);
        let y = shift.forward(&x).to_vec();
        assert_abs_diff_eq!(y[0], 10.0 / 2.0 + 255.0 * 0.2 / 2.0, epsilon = 1e-4);
        assert_abs_diff_eq!(y[1], 10.0 / 4.0 + 255.0 * 0.2 / 4.0, epsilon = 1e-4);
        assert_abs_diff_eq!(y[2], 10.0 / 0.5 + 255.0 * 0.2 / 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_round_trip_is_identity() {
        let sub = MeanShift::sub(DIV2K_RGB_MEAN, DIV2K_RGB_STD).unwrap();
        let add = MeanShift::add(DIV2K_RGB_MEAN, DIV2K_RGB_STD).unwrap();
        let x = RawTensor::rand(&[2, 3, 5, 7]);
        let restored = add.forward(&sub.forward(&x));
        for (a, b) in restored.to_vec().iter().zip(x.to_vec()) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_parameters_are_frozen() {
        let shift = MeanShift::sub(DIV2K_RGB_MEAN, DIV2K_RGB_STD).unwrap();
        assert_eq!(shift.num_parameters(), 12);
        assert_eq!(shift.num_trainable_parameters(), 0);

        let x = RawTensor::rand(&[1, 3, 2, 2]);
        x.borrow_mut().requires_grad = true;
        shift.forward(&x).sum().backward();
        assert!(shift.parameters().iter().all(|p| p.grad().is_none()));
        assert!(x.grad().is_some());
    }
}
