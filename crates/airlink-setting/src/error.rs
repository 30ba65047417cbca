use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingError {
    /// Backend reported a lower bound above the upper bound.
    #[error("setting {name}: inverted bounds min={min} max={max}")]
    InvertedBounds {
        name: &'static str,
        min: String,
        max: String,
    },
    /// Backend reported a value that does not order against itself (NaN).
    #[error("setting {name}: incomparable {part}={value}")]
    Incomparable {
        name: &'static str,
        part: &'static str,
        value: String,
    },
}
