/// Input pixel types the kernels are specialised for.
pub trait Pixel: bytemuck::Pod + Ord + Send + Sync + 'static {
    const BITS: u32;

    fn is_zero(self) -> bool;
}

impl Pixel for u8 {
    const BITS: u32 = 8;

    #[inline]
    fn is_zero(self) -> bool {
        self == 0
    }
}

impl Pixel for u16 {
    const BITS: u32 = 16;

    #[inline]
    fn is_zero(self) -> bool {
        self == 0
    }
}
