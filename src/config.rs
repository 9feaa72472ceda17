use crate::error::{CarnError, Result};

/// RGB mean of the DIV2K training set, in [0, 1] units
pub const DIV2K_RGB_MEAN: [f32; 3] = [0.4488, 0.4371, 0.4040];
/// Per-channel std used with [`DIV2K_RGB_MEAN`]
pub const DIV2K_RGB_STD: [f32; 3] = [1.0, 1.0, 1.0];

/// Hyperparameters of the network.
///
/// `Default` is the fixed E-CARN configuration: 3 colours, 64 features,
/// 3x3 kernels, 4 convolution groups, 4x upscaling.
#[derive(Clone, Debug, PartialEq)]
pub struct CarnConfig {
    pub n_colors: usize,
    pub n_feats: usize,
    pub kernel_size: usize,
    pub scale: usize,
    pub group: usize,
    pub rgb_mean: [f32; 3],
    pub rgb_std: [f32; 3],
}

impl Default for CarnConfig {
    fn default() -> Self {
        CarnConfig {
            n_colors: 3,
            n_feats: 64,
            kernel_size: 3,
            scale: 4,
            group: 4,
            rgb_mean: DIV2K_RGB_MEAN,
            rgb_std: DIV2K_RGB_STD,
        }
    }
}

impl CarnConfig {
    /// Check every grouped convolution the network will build divides evenly.
    ///
    /// Grouped convolutions see `n_feats` inputs and either `n_feats` or the
    /// upsampler's `r² * n_feats` outputs; fusion convolutions are ungrouped.
    pub fn validate(&self) -> Result<()> {
        if self.n_colors != 3 {
            return Err(CarnError::InvalidParameter(format!(
                "mean shift is defined for 3 colour channels, got {}",
                self.n_colors
            )));
        }
        if self.n_feats == 0 || self.group == 0 {
            return Err(CarnError::InvalidParameter(format!(
                "n_feats ({}) and group ({}) must be positive",
                self.n_feats, self.group
            )));
        }
        if self.kernel_size % 2 == 0 {
            return Err(CarnError::InvalidParameter(format!(
                "kernel size {} cannot preserve spatial size with symmetric padding",
                self.kernel_size
            )));
        }
        if self.rgb_std.iter().any(|&s| s == 0.0 || !s.is_finite()) {
            return Err(CarnError::InvalidParameter(format!(
                "rgb_std must be finite and non-zero, got {:?}",
                self.rgb_std
            )));
        }
        if self.n_feats % self.group != 0 {
            return Err(CarnError::GroupDivisibility {
                role: "feature",
                channels: self.n_feats,
                groups: self.group,
            });
        }
        crate::carn::Upsampler::check_scale(self.scale)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = CarnConfig::default();
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!((cfg.n_feats, cfg.group, cfg.scale), (64, 4, 4));
    }

    #[test]
    fn test_rejects_indivisible_groups() {
        let cfg = CarnConfig {
            n_feats: 30,
            ..CarnConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(CarnError::GroupDivisibility { channels: 30, groups: 4, .. })
        ));
    }

    #[test]
    fn test_rejects_unsupported_scale_and_even_kernel() {
        let bad_scale = CarnConfig {
            scale: 5,
            ..CarnConfig::default()
        };
        assert_eq!(bad_scale.validate(), Err(CarnError::UnsupportedScale(5)));

        let even_kernel = CarnConfig {
            kernel_size: 4,
            ..CarnConfig::default()
        };
        assert!(even_kernel.validate().is_err());
    }
}
