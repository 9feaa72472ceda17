use super::sequential::{LayerEntry, Sequential};
use crate::nn::Module;

/// Builder for [`Sequential`] models with named or unnamed layers
///
/// # Examples
///
/// ```
/// use ecarn::nn::{Conv2d, PixelShuffle, Sequential};
///
/// let upsampler = Sequential::builder()
///     .add_named("conv", Box::new(Conv2d::new(8, 32, 3, 1, 1, true).unwrap()))
///     .add_unnamed(Box::new(PixelShuffle::new(2)))
///     .build();
/// assert_eq!(upsampler.len(), 2);
/// ```
pub struct SequentialBuilder {
    entries: Vec<LayerEntry>,
}

impl SequentialBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a layer keyed by its position in the state dict
    #[must_use]
    pub fn add_unnamed(mut self, layer: Box<dyn Module>) -> Self {
        self.entries.push(LayerEntry { name: None, layer });
        self
    }

    /// Add a layer keyed by `name`; an empty name counts as unnamed
    #[must_use]
    pub fn add_named(mut self, name: impl Into<String>, layer: Box<dyn Module>) -> Self {
        let name = name.into();
        self.entries.push(LayerEntry {
            name: (!name.is_empty()).then_some(name),
            layer,
        });
        self
    }

    #[must_use]
    pub fn build(self) -> Sequential {
        Sequential {
            layers: self.entries,
        }
    }
}

impl Default for SequentialBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::layers::{Conv2d, ReLU};

    #[test]
    fn test_builder_empty() {
        let model = SequentialBuilder::new().build();
        assert_eq!(model.len(), 0);
    }

    #[test]
    fn test_builder_mixed() {
        let model = SequentialBuilder::new()
            .add_named("fc1", Box::new(Conv2d::new(2, 3, 1, 1, 0, true).unwrap()))
            .add_unnamed(Box::new(ReLU))
            .add_named("", Box::new(Conv2d::new(3, 1, 1, 1, 0, true).unwrap()))
            .build();

        assert_eq!(model.len(), 3);
        // an empty name falls back to the index
        let keys: Vec<String> = model.state_dict().into_keys().collect();
        assert_eq!(keys, vec!["2.bias", "2.weight", "fc1.bias", "fc1.weight"]);
    }
}
