// maths.rs — angle constants and integer power used to size the tessellation

use std::f64::consts::PI;

pub const ONE_EIGHTY_DEGREES: f64 = PI;
pub const THREE_SIXTY_DEGREES: f64 = ONE_EIGHTY_DEGREES * 2.0;
pub const ONE_TWENTY_DEGREES: f64 = THREE_SIXTY_DEGREES / 3.0;
/// North pole altitude.
pub const NINETY_DEGREES: f64 = PI / 2.0;

/// `base ^ exponent` by square-and-multiply.
///
/// The exponent's bits are read as `u32`, so a negative exponent behaves like its
/// two's-complement reinterpretation. Overflow wraps silently.
pub fn int_pow(base: i32, exponent: i32) -> i32 {
    let mut result: i32 = 1;
    let mut bits = exponent as u32;
    let mut power = base;

    while bits != 0 {
        if bits & 1 != 0 {
            result = result.wrapping_mul(power);
        }
        bits >>= 1;
        power = power.wrapping_mul(power);
    }

    result
}
