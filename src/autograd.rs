use crate::tensor::{RawTensor, Tensor};
use std::collections::HashSet;

// ===== GRADIENT FUNCTION TRAIT =====

/// How gradients flow backward through one operation.
///
/// `backward` receives the gradient of the loss w.r.t. the operation's output
/// and the operation's inputs, and returns one entry per parent (`None` for
/// parents that do not track gradients).
pub trait GradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>>;
    fn clone_box(&self) -> Box<dyn GradFn>;
}

// ===== BACKPROPAGATION =====

impl RawTensor {
    /// Reverse-mode differentiation from this tensor.
    ///
    /// The seed gradient is all ones, so calling this on a non-scalar output
    /// differentiates the sum of its elements. Nodes are processed in reverse
    /// topological order so a tensor consumed several times (the cascade
    /// concatenations, a shared block) has every contribution summed before it
    /// propagates further.
    ///
    /// # Panics
    /// Panics if the tensor does not require gradients.
    pub fn backward(tensor_ref: &Tensor) {
        enum Action {
            Visit(Tensor),
            PostVisit(Tensor),
        }

        {
            let mut tensor = tensor_ref.borrow_mut();
            assert!(
                tensor.requires_grad,
                "Called backward on a tensor that doesn't require grad"
            );
            if tensor.grad.is_none() {
                tensor.grad = Some(vec![1.0; tensor.data.len()]);
            }
        }

        // Post-order DFS with an explicit stack; deep graphs would overflow recursion.
        let mut topo_order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![Action::Visit(tensor_ref.clone())];

        while let Some(action) = stack.pop() {
            match action {
                Action::Visit(t) => {
                    if !visited.insert(t.as_ptr()) {
                        continue;
                    }
                    stack.push(Action::PostVisit(t.clone()));
                    let parents = t.borrow().parents.clone();
                    for parent in parents {
                        if parent.borrow().requires_grad {
                            stack.push(Action::Visit(parent));
                        }
                    }
                }
                Action::PostVisit(t) => topo_order.push(t),
            }
        }

        for tensor in topo_order.into_iter().rev() {
            let (grad_fn, parents, grad, shape) = {
                let t = tensor.borrow();
                (
                    t.grad_fn.as_ref().map(|gf| gf.clone_box()),
                    t.parents.clone(),
                    t.grad.clone(),
                    t.shape.clone(),
                )
            };
            let (Some(grad_fn), Some(grad)) = (grad_fn, grad) else {
                continue;
            };

            let grad_out = RawTensor {
                data: grad,
                shape,
                grad: None,
                requires_grad: false,
                grad_fn: None,
                parents: vec![],
            };
            let parent_grads = grad_fn.backward(&grad_out, &parents);

            for (parent_grad, parent_ref) in parent_grads.into_iter().zip(parents.iter()) {
                let Some(g) = parent_grad else { continue };
                let mut parent = parent_ref.borrow_mut();
                if !parent.requires_grad {
                    continue;
                }
                let contribution = std::mem::take(&mut g.borrow_mut().data);
                match parent.grad {
                    None => parent.grad = Some(contribution),
                    Some(ref mut existing) => Self::accumulate_grad(existing, &contribution),
                }
            }
        }
    }

    fn accumulate_grad(existing: &mut [f32], contribution: &[f32]) {
        assert_eq!(
            existing.len(),
            contribution.len(),
            "Gradient size mismatch during accumulation"
        );
        for (a, b) in existing.iter_mut().zip(contribution) {
            *a += *b;
        }
    }
}
