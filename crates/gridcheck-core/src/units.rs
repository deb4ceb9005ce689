//! Compile-time unit safety for network quantities.
//!
//! Contingency studies juggle several quantities that are all `f64` at heart:
//! bus nominal voltages (kV), voltage magnitudes (pu), branch ratings and
//! loadings (MVA), machine reactive output (Mvar). Model and record types carry
//! these newtypes; snapshot tables store raw `f64` cells once a value has been
//! captured.
//!
//! # Usage
//!
//! ```
//! use gridcheck_core::units::{Kilovolts, Megavars, PerUnit};
//!
//! let nominal = Kilovolts(220.0);
//! assert!(nominal > Kilovolts(219.0) && nominal <= Kilovolts(221.0));
//!
//! let step = PerUnit(1.02) - PerUnit(0.95);
//! assert!((step.value() - 0.07).abs() < 1e-9);
//!
//! let q = Megavars(-5.0) * 3.0;
//! assert_eq!(q.value(), -15.0);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

/// Declares a transparent `f64` quantity with the arithmetic a study needs.
macro_rules! quantity {
    ($(#[$meta:meta])* $name:ident, $symbol:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub f64);

        impl $name {
            #[inline]
            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            #[inline]
            pub const fn value(self) -> f64 {
                self.0
            }

            #[inline]
            pub fn min(self, other: Self) -> Self {
                Self(self.0.min(other.0))
            }

            #[inline]
            pub fn max(self, other: Self) -> Self {
                Self(self.0.max(other.0))
            }
        }

        impl Add for $name {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl Mul<f64> for $name {
            type Output = Self;
            fn mul(self, factor: f64) -> Self {
                Self(self.0 * factor)
            }
        }

        /// Ratio of two quantities of the same unit.
        impl Div for $name {
            type Output = f64;
            fn div(self, rhs: Self) -> f64 {
                self.0 / rhs.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:.4} {}", self.0, $symbol)
            }
        }
    };
}

quantity!(
    /// Active power (MW).
    Megawatts,
    "MW"
);

quantity!(
    /// Reactive power (Mvar). Negative values absorb.
    Megavars,
    "Mvar"
);

quantity!(
    /// Apparent power (MVA), used for ratings and loadings alike.
    MegavoltAmperes,
    "MVA"
);

quantity!(
    /// Voltage magnitude relative to the bus nominal voltage.
    PerUnit,
    "pu"
);

quantity!(
    /// Nominal voltage (kV).
    Kilovolts,
    "kV"
);

impl PerUnit {
    pub const ONE: Self = Self(1.0);
}
