//! Easing curves that reshape linear progress `t ∈ [0, 1]`.

use std::fmt;

/// Monotonic 0→1 remapping used to shape a rate ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Easing {
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
    EaseInCubic,
    EaseInQuart,
    EaseInQuint,
}

impl Easing {
    /// Case-insensitive lookup; `None` for unknown names.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "linear" => Some(Easing::Linear),
            "easein" | "ease-in" => Some(Easing::EaseIn),
            "easeout" | "ease-out" => Some(Easing::EaseOut),
            "easeinout" | "ease-in-out" => Some(Easing::EaseInOut),
            "easeincubic" => Some(Easing::EaseInCubic),
            "easeinquart" => Some(Easing::EaseInQuart),
            "easeinquint" => Some(Easing::EaseInQuint),
            _ => None,
        }
    }

    pub fn parse_or_linear(name: &str) -> Self {
        Self::parse(name).unwrap_or(Easing::Linear)
    }

    /// Map progress `t` onto the curve. `t` is expected within `[0, 1]`.
    pub fn apply(self, t: f64) -> f64 {
        match self {
            Easing::Linear => t,
            Easing::EaseIn => t * t,
            Easing::EaseOut => t * (2.0 - t),
            Easing::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    -1.0 + (4.0 - 2.0 * t) * t
                }
            }
            Easing::EaseInCubic => t.powi(3),
            Easing::EaseInQuart => t.powi(4),
            Easing::EaseInQuint => t.powi(5),
        }
    }
}

impl fmt::Display for Easing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Easing::Linear => "linear",
            Easing::EaseIn => "easein",
            Easing::EaseOut => "easeout",
            Easing::EaseInOut => "easeinout",
            Easing::EaseInCubic => "easeincubic",
            Easing::EaseInQuart => "easeinquart",
            Easing::EaseInQuint => "easeinquint",
        };
        write!(f, "{s}")
    }
}
