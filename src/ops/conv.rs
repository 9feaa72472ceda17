use crate::autograd::GradFn;
use crate::tensor::{RawTensor, Tensor};

/// Geometry of a 2D convolution over NCHW input.
///
/// Weights are laid out `[out_channels, in_channels / groups, kh, kw]`;
/// output channel `co` belongs to group `co / (out_channels / groups)` and
/// only reads the input channels of that group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Conv2dParams {
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    pub groups: usize,
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Conv2dParams {
            stride: (1, 1),
            padding: (0, 0),
            groups: 1,
        }
    }
}

/// Resolved dimensions for one convolution call
#[derive(Clone, Copy, Debug)]
struct ConvGeometry {
    batch: usize,
    in_ch: usize,
    in_h: usize,
    in_w: usize,
    out_ch: usize,
    kh: usize,
    kw: usize,
    out_h: usize,
    out_w: usize,
    in_per_group: usize,
    out_per_group: usize,
    params: Conv2dParams,
}

impl ConvGeometry {
    fn new(input_shape: &[usize], weight_shape: &[usize], params: Conv2dParams) -> Self {
        assert_eq!(
            input_shape.len(),
            4,
            "conv2d: expected 4D input (B, C, H, W), got shape {input_shape:?}"
        );
        assert_eq!(
            weight_shape.len(),
            4,
            "conv2d: expected 4D weight (O, C/groups, KH, KW), got shape {weight_shape:?}"
        );
        let Conv2dParams {
            stride: (sh, sw),
            padding: (ph, pw),
            groups,
        } = params;
        assert!(groups > 0, "conv2d: groups must be positive");
        assert!(sh > 0 && sw > 0, "conv2d: stride must be positive");

        let (batch, in_ch, in_h, in_w) = (
            input_shape[0],
            input_shape[1],
            input_shape[2],
            input_shape[3],
        );
        let (out_ch, in_per_group, kh, kw) = (
            weight_shape[0],
            weight_shape[1],
            weight_shape[2],
            weight_shape[3],
        );
        assert_eq!(
            in_ch % groups,
            0,
            "conv2d: input channels ({in_ch}) must be divisible by groups ({groups})"
        );
        assert_eq!(
            out_ch % groups,
            0,
            "conv2d: output channels ({out_ch}) must be divisible by groups ({groups})"
        );
        assert_eq!(
            in_per_group * groups,
            in_ch,
            "Channel mismatch: input has {in_ch} channels but weight expects {}",
            in_per_group * groups
        );
        assert!(
            in_h + 2 * ph >= kh && in_w + 2 * pw >= kw,
            "conv2d: kernel {kh}x{kw} larger than padded input {}x{}",
            in_h + 2 * ph,
            in_w + 2 * pw
        );

        ConvGeometry {
            batch,
            in_ch,
            in_h,
            in_w,
            out_ch,
            kh,
            kw,
            out_h: (in_h + 2 * ph - kh) / sh + 1,
            out_w: (in_w + 2 * pw - kw) / sw + 1,
            in_per_group,
            out_per_group: out_ch / groups,
            params,
        }
    }

    fn output_shape(&self) -> [usize; 4] {
        [self.batch, self.out_ch, self.out_h, self.out_w]
    }

    /// Input coordinate hit by output position `o` and kernel tap `k`, if inside the image
    #[inline]
    fn source(o: usize, k: usize, stride: usize, pad: usize, extent: usize) -> Option<usize> {
        (o * stride + k).checked_sub(pad).filter(|&i| i < extent)
    }

    /// Visit every (output element, kernel tap) pair that reads a real input pixel.
    ///
    /// The callback receives `(out_idx, in_idx, weight_idx)` as flat indices.
    fn for_each_tap(&self, mut f: impl FnMut(usize, usize, usize)) {
        let (sh, sw) = self.params.stride;
        let (ph, pw) = self.params.padding;
        let in_plane = self.in_h * self.in_w;
        let out_plane = self.out_h * self.out_w;
        let k_plane = self.kh * self.kw;

        for b in 0..self.batch {
            for co in 0..self.out_ch {
                let g = co / self.out_per_group;
                let out_base = (b * self.out_ch + co) * out_plane;
                for cl in 0..self.in_per_group {
                    let ci = g * self.in_per_group + cl;
                    let in_base = (b * self.in_ch + ci) * in_plane;
                    let w_base = (co * self.in_per_group + cl) * k_plane;
                    for ki in 0..self.kh {
                        for kj in 0..self.kw {
                            let w_idx = w_base + ki * self.kw + kj;
                            for oh in 0..self.out_h {
                                let Some(ih) = Self::source(oh, ki, sh, ph, self.in_h) else {
                                    continue;
                                };
                                for ow in 0..self.out_w {
                                    let Some(iw) = Self::source(ow, kj, sw, pw, self.in_w) else {
                                        continue;
                                    };
                                    f(
                                        out_base + oh * self.out_w + ow,
                                        in_base + ih * self.in_w + iw,
                                        w_idx,
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Gradient of conv2d w.r.t. input, weight and (optional) bias.
///
/// Parents are `[input, weight]` or `[input, weight, bias]`.
#[derive(Clone)]
pub struct Conv2dGradFn {
    params: Conv2dParams,
}

impl GradFn for Conv2dGradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let (Some(x_ref), Some(w_ref)) = (parents.first(), parents.get(1)) else {
            return vec![None; parents.len()];
        };
        let x = x_ref.borrow();
        let w = w_ref.borrow();
        let geo = ConvGeometry::new(&x.shape, &w.shape, self.params);
        let go = &out_grad.data;

        let mut gx = x.requires_grad.then(|| vec![0.0; x.data.len()]);
        let mut gw = w.requires_grad.then(|| vec![0.0; w.data.len()]);
        if gx.is_some() || gw.is_some() {
            geo.for_each_tap(|o, i, k| {
                let g = go[o];
                if let Some(gx) = gx.as_mut() {
                    gx[i] += g * w.data[k];
                }
                if let Some(gw) = gw.as_mut() {
                    gw[k] += g * x.data[i];
                }
            });
        }

        let mut grads = vec![
            gx.map(|g| RawTensor::new(g, &x.shape, false)),
            gw.map(|g| RawTensor::new(g, &w.shape, false)),
        ];

        if let Some(b_ref) = parents.get(2) {
            let b = b_ref.borrow();
            let gb = b.requires_grad.then(|| {
                let plane = geo.out_h * geo.out_w;
                let mut gb = vec![0.0; geo.out_ch];
                for (n, chunk) in go.chunks(plane).enumerate() {
                    gb[n % geo.out_ch] += chunk.iter().sum::<f32>();
                }
                RawTensor::new(gb, &b.shape, false)
            });
            grads.push(gb);
        }
        grads
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(self.clone())
    }
}

impl RawTensor {
    /// 2D cross-correlation over NCHW input with optional per-channel bias.
    ///
    /// # Panics
    /// Panics when the input is not 4D, the channel count disagrees with the
    /// weight, channels are not divisible by `groups`, or the bias length is
    /// not the number of output channels.
    pub fn conv2d(
        input: &Tensor,
        weight: &Tensor,
        bias: Option<&Tensor>,
        params: Conv2dParams,
    ) -> Tensor {
        let (data, out_shape, requires_grad) = {
            let x = input.borrow();
            let w = weight.borrow();
            let geo = ConvGeometry::new(&x.shape, &w.shape, params);
            let plane = geo.out_h * geo.out_w;
            let mut out = vec![0.0; geo.batch * geo.out_ch * plane];

            let mut requires_grad = x.requires_grad || w.requires_grad;
            if let Some(b_ref) = bias {
                let b = b_ref.borrow();
                assert_eq!(
                    b.data.len(),
                    geo.out_ch,
                    "conv2d: bias has {} elements, expected {}",
                    b.data.len(),
                    geo.out_ch
                );
                for (n, chunk) in out.chunks_mut(plane).enumerate() {
                    chunk.fill(b.data[n % geo.out_ch]);
                }
                requires_grad |= b.requires_grad;
            }

            geo.for_each_tap(|o, i, k| out[o] += x.data[i] * w.data[k]);
            (out, geo.output_shape(), requires_grad)
        };

        let out = Self::new(data, &out_shape, false);
        if requires_grad {
            let mut parents = vec![input.clone(), weight.clone()];
            if let Some(b) = bias {
                parents.push(b.clone());
            }
            Self::attach(&out, parents, Box::new(Conv2dGradFn { params }));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{TensorOps, check_gradients, manual_seed};

    fn same(groups: usize) -> Conv2dParams {
        Conv2dParams {
            stride: (1, 1),
            padding: (1, 1),
            groups,
        }
    }

    #[test]
    fn test_identity_kernel_preserves_input() {
        let x = RawTensor::new((0..9).map(|v| v as f32).collect(), &[1, 1, 3, 3], false);
        let mut k = vec![0.0; 9];
        k[4] = 1.0;
        let w = RawTensor::new(k, &[1, 1, 3, 3], false);
        let y = RawTensor::conv2d(&x, &w, None, same(1));
        assert_eq!(y.shape(), vec![1, 1, 3, 3]);
        assert_eq!(y.to_vec(), x.to_vec());
    }

    #[test]
    fn test_zero_padding_at_borders() {
        // all-ones 3x3 kernel on all-ones 3x3 image counts in-bounds neighbours
        let x = RawTensor::constant(1.0, &[1, 1, 3, 3]);
        let w = RawTensor::constant(1.0, &[1, 1, 3, 3]);
        let b = RawTensor::new(vec![0.5], &[1], false);
        let y = RawTensor::conv2d(&x, &w, Some(&b), same(1));
        assert_eq!(
            y.to_vec(),
            vec![4.5, 6.5, 4.5, 6.5, 9.5, 6.5, 4.5, 6.5, 4.5]
        );
    }

    #[test]
    fn test_stride_two_output_size() {
        let x = RawTensor::constant(1.0, &[2, 3, 8, 8]);
        let w = RawTensor::constant(1.0, &[4, 3, 3, 3]);
        let params = Conv2dParams {
            stride: (2, 2),
            padding: (1, 1),
            groups: 1,
        };
        let y = RawTensor::conv2d(&x, &w, None, params);
        assert_eq!(y.shape(), vec![2, 4, 4, 4]);
    }

    #[test]
    fn test_groups_isolate_channels() {
        // Two groups: output 0 sees only input 0, output 1 only input 1.
        let x = RawTensor::new(vec![1.0, 1.0, 1.0, 1.0, 10.0, 10.0, 10.0, 10.0], &[1, 2, 2, 2], false);
        let w = RawTensor::new(vec![1.0, 1.0], &[2, 1, 1, 1], false);
        let y = RawTensor::conv2d(&x, &w, None, Conv2dParams { groups: 2, ..Default::default() });
        assert_eq!(y.to_vec(), vec![1.0, 1.0, 1.0, 1.0, 10.0, 10.0, 10.0, 10.0]);
    }

    #[test]
    #[should_panic(expected = "Channel mismatch")]
    fn test_channel_mismatch_panics() {
        let x = RawTensor::zeros(&[1, 5, 4, 4]);
        let w = RawTensor::zeros(&[4, 4, 3, 3]);
        RawTensor::conv2d(&x, &w, None, same(1));
    }

    #[test]
    #[should_panic(expected = "divisible by groups")]
    fn test_indivisible_groups_panics() {
        let x = RawTensor::zeros(&[1, 6, 4, 4]);
        let w = RawTensor::zeros(&[4, 2, 3, 3]);
        RawTensor::conv2d(&x, &w, None, same(4));
    }

    #[test]
    fn test_input_gradient_matches_finite_differences() {
        manual_seed(11);
        let w = RawTensor::randn(&[4, 2, 3, 3]);
        let b = RawTensor::randn(&[4]);
        let mask = RawTensor::randn(&[1, 4, 4, 4]);
        let x = RawTensor::randn(&[1, 4, 4, 4]);
        x.borrow_mut().requires_grad = true;

        let (max_err, _, passed) = check_gradients(
            &x,
            |t| RawTensor::conv2d(t, &w, Some(&b), same(2)).elem_mul(&mask).sum(),
            1e-2,
            1e-2,
        );
        assert!(passed, "max error {max_err}");
    }

    #[test]
    fn test_weight_and_bias_gradients_match_finite_differences() {
        manual_seed(12);
        let x = RawTensor::randn(&[2, 4, 3, 3]);
        let mask = RawTensor::randn(&[2, 2, 3, 3]);
        let w = RawTensor::randn(&[2, 2, 3, 3]);
        w.borrow_mut().requires_grad = true;
        let b = RawTensor::randn(&[2]);
        b.borrow_mut().requires_grad = true;

        let (w_err, _, w_ok) = check_gradients(
            &w,
            |t| RawTensor::conv2d(&x, t, Some(&b), same(2)).elem_mul(&mask).sum(),
            1e-2,
            1e-2,
        );
        assert!(w_ok, "weight max error {w_err}");

        let (b_err, _, b_ok) = check_gradients(
            &b,
            |t| RawTensor::conv2d(&x, &w, Some(t), same(2)).elem_mul(&mask).sum(),
            1e-2,
            1e-2,
        );
        assert!(b_ok, "bias max error {b_err}");
    }
}
