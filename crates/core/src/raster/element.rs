//! Cell value trait shared by every grid.

use num_traits::{NumCast, Zero};
use std::fmt::Debug;

/// Types a [`Raster`](crate::Raster) can hold.
///
/// The engine keeps its water grids in `f64`, direction codes in `u8` and
/// persists GeoTIFF output as `f32`; this bound collects what grid code
/// needs from all of them: zero initialization, casting and a no-data test.
pub trait RasterElement:
    Copy + Debug + PartialOrd + NumCast + Zero + Send + Sync + 'static
{
    /// No-data marker used when a grid does not declare one
    fn default_nodata() -> Self;

    /// Whether this value matches the grid's no-data marker
    fn is_nodata(&self, nodata: Option<Self>) -> bool;

    /// Widen to f64 for the aggregate statistics
    fn to_f64(self) -> Option<f64> {
        NumCast::from(self)
    }
}

// Direction grids use the full 0..=8 code range, so the u8 marker sits at
// the top of the type instead of the conventional minimum.
macro_rules! int_element {
    ($t:ty, $nodata:expr) => {
        impl RasterElement for $t {
            fn default_nodata() -> Self {
                $nodata
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                nodata == Some(*self)
            }
        }
    };
}

macro_rules! float_element {
    ($t:ty) => {
        impl RasterElement for $t {
            fn default_nodata() -> Self {
                <$t>::NAN
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                if self.is_nan() {
                    return true;
                }
                match nodata {
                    Some(nd) => (self - nd).abs() < <$t>::EPSILON * 100.0,
                    None => false,
                }
            }
        }
    };
}

int_element!(u8, u8::MAX);
int_element!(i32, i32::MIN);
float_element!(f32);
float_element!(f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_is_always_nodata() {
        assert!(f64::NAN.is_nodata(None));
        assert!(f64::NAN.is_nodata(Some(-9999.0)));
        assert!((-9999.0f64).is_nodata(Some(-9999.0)));
        assert!(!0.0f64.is_nodata(Some(-9999.0)));
    }

    #[test]
    fn integer_nodata_needs_a_declared_marker() {
        assert!(!0u8.is_nodata(None));
        assert!(255u8.is_nodata(Some(255)));
        assert_eq!(u8::default_nodata(), 255);
    }
}
