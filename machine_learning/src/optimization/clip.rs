/// Rescales `grad` in place so that its global L2 norm is at most `max_norm`.
///
/// # Returns
/// The norm of the gradient before clipping.
pub fn clip_grad_norm(grad: &mut [f32], max_norm: f32) -> f32 {
    let norm = grad.iter().map(|g| g * g).sum::<f32>().sqrt();

    if norm > max_norm && norm > 0. {
        let scale = max_norm / (norm + 1e-6);
        grad.iter_mut().for_each(|g| *g *= scale);
    }

    norm
}
