/// Element types a receive buffer can be made of.
///
/// Tensor payloads are cast in place to `f32`, so the backing buffer must be
/// at least 4 bytes aligned.
pub trait Align4: bytemuck::Pod {}

impl Align4 for u32 {}
impl Align4 for i32 {}
impl Align4 for u64 {}
impl Align4 for i64 {}
impl Align4 for f32 {}
impl Align4 for f64 {}
