use crate::error::{CarnError, Result};
use crate::io::{StateDict, TensorData, load_parameter};
use crate::nn::Module;
use crate::ops::Conv2dParams;
use crate::profile::{self, LayerCost};
use crate::tensor::{RawTensor, Tensor, TensorOps};

/// 2D convolution layer over NCHW input, optionally grouped.
///
/// Initialisation follows the common default for convolutions: weight and
/// bias uniform in `[-1/sqrt(fan_in), 1/sqrt(fan_in))`, with
/// `fan_in = in_channels / groups * k * k`.
pub struct Conv2d {
    weight: Tensor,       // [out_channels, in_channels / groups, k, k]
    bias: Option<Tensor>, // [out_channels]
    params: Conv2dParams,
    in_channels: usize,
}

impl Conv2d {
    /// Ungrouped convolution with a square kernel.
    pub fn new(
        in_ch: usize,
        out_ch: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        use_bias: bool,
    ) -> Result<Self> {
        Self::grouped(in_ch, out_ch, kernel, stride, padding, 1, use_bias)
    }

    /// Grouped convolution: channels split into `groups` independent subsets.
    pub fn grouped(
        in_ch: usize,
        out_ch: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        groups: usize,
        use_bias: bool,
    ) -> Result<Self> {
        if kernel == 0 || stride == 0 || groups == 0 {
            return Err(CarnError::InvalidParameter(format!(
                "Conv2d: kernel ({kernel}), stride ({stride}) and groups ({groups}) must be positive"
            )));
        }
        for (role, channels) in [("input", in_ch), ("output", out_ch)] {
            if channels % groups != 0 {
                return Err(CarnError::GroupDivisibility {
                    role,
                    channels,
                    groups,
                });
            }
        }
        Ok(Self::build(
            in_ch, out_ch, kernel, stride, padding, groups, use_bias,
        ))
    }

    /// Kernel `k`, stride 1, padding `k / 2`: spatial size is preserved for odd `k`.
    pub fn same(in_ch: usize, out_ch: usize, kernel: usize, groups: usize) -> Result<Self> {
        Self::grouped(in_ch, out_ch, kernel, 1, kernel / 2, groups, true)
    }

    fn build(
        in_ch: usize,
        out_ch: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        groups: usize,
        use_bias: bool,
    ) -> Self {
        let fan_in = in_ch / groups * kernel * kernel;
        let bound = 1.0 / (fan_in.max(1) as f32).sqrt();

        let w = RawTensor::uniform(&[out_ch, in_ch / groups, kernel, kernel], -bound, bound);
        w.borrow_mut().requires_grad = true;
        let b = use_bias.then(|| {
            let b = RawTensor::uniform(&[out_ch], -bound, bound);
            b.borrow_mut().requires_grad = true;
            b
        });
        log::trace!("Conv2d {in_ch}->{out_ch} k{kernel} s{stride} p{padding} g{groups}");

        Conv2d {
            weight: w,
            bias: b,
            params: Conv2dParams {
                stride: (stride, stride),
                padding: (padding, padding),
                groups,
            },
            in_channels: in_ch,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.weight.borrow().shape[0]
    }

    pub fn kernel_size(&self) -> usize {
        self.weight.borrow().shape[2]
    }

    pub fn groups(&self) -> usize {
        self.params.groups
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Stop (or resume) gradient tracking for this layer's parameters
    pub fn set_requires_grad(&self, requires_grad: bool) {
        for p in self.parameters() {
            let mut p = p.borrow_mut();
            p.requires_grad = requires_grad;
            if !requires_grad {
                p.grad = None;
            }
        }
    }

    fn cost(&self, input_shape: &[usize], output_shape: &[usize]) -> LayerCost {
        let k = self.kernel_size();
        let kernel_mul = (k * k * self.in_channels / self.params.groups) as u64;
        let bias_ops = u64::from(self.bias.is_some());
        let out_elems = output_shape.iter().product::<usize>() as u64;
        LayerCost {
            kind: "Conv2d",
            input_shape: input_shape.to_vec(),
            output_shape: output_shape.to_vec(),
            params: self.num_parameters(),
            madds: out_elems * (2 * kernel_mul - 1 + bias_ops),
            flops: out_elems * (kernel_mul + bias_ops),
        }
    }
}

impl Module for Conv2d {
    fn forward(&self, x: &Tensor) -> Tensor {
        let out = RawTensor::conv2d(x, &self.weight, self.bias.as_ref(), self.params);
        if profile::is_recording() {
            profile::record(self.cost(&x.shape(), &out.shape()));
        }
        out
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut p = vec![self.weight.clone()];
        if let Some(ref b) = self.bias {
            p.push(b.clone());
        }
        p
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        state.insert("weight".to_string(), TensorData::from_tensor(&self.weight));
        if let Some(ref b) = self.bias {
            state.insert("bias".to_string(), TensorData::from_tensor(b));
        }
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        load_parameter(&self.weight, state, "weight");
        if let Some(ref b) = self.bias {
            load_parameter(b, state, "bias");
        }
    }
}

#[cfg(test)]
mod conv2d_tests {
    use super::*;
    use crate::tensor::manual_seed;

    #[test]
    fn test_conv2d_forward_shape() {
        let conv = Conv2d::new(3, 16, 3, 1, 1, true).unwrap();
        let x = RawTensor::randn(&[1, 3, 12, 12]);
        assert_eq!(conv.forward(&x).shape(), vec![1, 16, 12, 12]);
    }

    #[test]
    fn test_grouped_weight_shape_and_param_count() {
        let conv = Conv2d::same(64, 64, 3, 4).unwrap();
        assert_eq!(conv.weight().shape(), vec![64, 16, 3, 3]);
        assert_eq!(conv.num_parameters(), 64 * 16 * 9 + 64);
        assert_eq!(conv.groups(), 4);
        assert_eq!(conv.in_channels(), 64);
    }

    #[test]
    fn test_grouped_rejects_indivisible_channels() {
        let err = Conv2d::grouped(6, 8, 3, 1, 1, 4, true).err();
        assert_eq!(
            err,
            Some(CarnError::GroupDivisibility {
                role: "input",
                channels: 6,
                groups: 4
            })
        );
        assert!(Conv2d::grouped(8, 8, 0, 1, 0, 1, true).is_err());
    }

    #[test]
    fn test_init_within_fan_in_bound() {
        manual_seed(3);
        let conv = Conv2d::same(8, 8, 3, 2).unwrap();
        let bound = 1.0 / ((8 / 2 * 9) as f32).sqrt();
        assert!(conv.weight().to_vec().iter().all(|v| v.abs() <= bound));
    }

    #[test]
    fn test_conv2d_gradient_reaches_parameters() {
        let conv = Conv2d::same(4, 4, 3, 2).unwrap();
        let x = RawTensor::randn(&[2, 4, 5, 5]);
        conv.forward(&x).sum().backward();
        for p in conv.parameters() {
            assert!(p.grad().is_some());
        }
    }

    #[test]
    fn test_frozen_layer_receives_no_gradient() {
        let conv = Conv2d::new(2, 2, 1, 1, 0, true).unwrap();
        conv.set_requires_grad(false);
        let x = RawTensor::randn(&[1, 2, 3, 3]);
        x.borrow_mut().requires_grad = true;
        conv.forward(&x).sum().backward();
        assert!(x.grad().is_some());
        assert!(conv.parameters().iter().all(|p| p.grad().is_none()));
    }

    #[test]
    fn test_zero_kernel_or_stride_is_an_error() {
        for (kernel, stride) in [(0, 1), (3, 0)] {
            assert!(matches!(
                Conv2d::new(3, 16, kernel, stride, 1, true),
                Err(CarnError::InvalidParameter(_))
            ));
        }
        assert!(Conv2d::new(3, 16, 3, 1, 1, true).is_ok());
    }
}
