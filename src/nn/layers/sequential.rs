use crate::io::{StateDict, insert_prefixed, sub_state};
use crate::nn::Module;
use crate::tensor::Tensor;

use super::sequential_builder::SequentialBuilder;

/// One slot in a [`Sequential`]; unnamed layers are keyed by their index.
pub(crate) struct LayerEntry {
    pub(crate) name: Option<String>,
    pub(crate) layer: Box<dyn Module>,
}

impl LayerEntry {
    fn key(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| index.to_string())
    }
}

/// Layers applied in order.
pub struct Sequential {
    pub(crate) layers: Vec<LayerEntry>,
}

impl Sequential {
    pub fn new(layers: Vec<Box<dyn Module>>) -> Self {
        Sequential {
            layers: layers
                .into_iter()
                .map(|layer| LayerEntry { name: None, layer })
                .collect(),
        }
    }

    #[must_use]
    pub fn builder() -> SequentialBuilder {
        SequentialBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Module for Sequential {
    fn forward(&self, x: &Tensor) -> Tensor {
        let mut current = x.clone();
        for entry in &self.layers {
            current = entry.layer.forward(&current);
        }
        current
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.layers
            .iter()
            .flat_map(|e| e.layer.parameters())
            .collect()
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        for (i, entry) in self.layers.iter().enumerate() {
            insert_prefixed(&mut state, &entry.key(i), entry.layer.state_dict());
        }
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        for (i, entry) in self.layers.iter_mut().enumerate() {
            let sub = sub_state(state, &entry.key(i));
            if !sub.is_empty() {
                entry.layer.load_state_dict(&sub);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Conv2d, ReLU};
    use crate::tensor::{RawTensor, TensorOps};

    #[test]
    fn test_forward_chains_layers() {
        let model = Sequential::new(vec![
            Box::new(Conv2d::new(3, 8, 3, 1, 1, true).unwrap()),
            Box::new(ReLU),
            Box::new(Conv2d::new(8, 2, 1, 1, 0, true).unwrap()),
        ]);
        let y = model.forward(&RawTensor::randn(&[1, 3, 6, 6]));
        assert_eq!(y.shape(), vec![1, 2, 6, 6]);
        assert_eq!(model.len(), 3);
    }

    #[test]
    fn test_state_dict_keys_use_index_or_name() {
        let model = Sequential::builder()
            .add_unnamed(Box::new(Conv2d::new(1, 1, 1, 1, 0, true).unwrap()))
            .add_unnamed(Box::new(ReLU))
            .add_named("proj", Box::new(Conv2d::new(1, 1, 1, 1, 0, false).unwrap()))
            .build();
        let keys: Vec<String> = model.state_dict().into_keys().collect();
        assert_eq!(keys, vec!["0.bias", "0.weight", "proj.weight"]);
    }

    #[test]
    fn test_empty_sequential_is_identity() {
        let model = Sequential::new(vec![]);
        let x = RawTensor::randn(&[1, 2, 3, 3]);
        assert_eq!(model.forward(&x).to_vec(), x.to_vec());
        assert!(model.is_empty());
    }
}
