//! Error types for trainwatch core
//!
//! Two families, neither of them fatal:
//! - Frame decoding failures (dropped frame, session continues)
//! - Axis configuration mistakes (rejected at configuration time)

/// Why an inbound frame did not produce a sample
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Frame is not well-formed structured data
    #[error("malformed frame: {0}")]
    Parse(String),

    /// Frame parsed but carries no usable metric
    #[error("frame is not a metric sample: {0}")]
    Schema(String),
}

impl DecodeError {
    /// Check if the frame failed to parse at all
    #[inline]
    #[must_use]
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    /// Check if the frame parsed but failed the sample invariant
    #[inline]
    #[must_use]
    pub fn is_schema(&self) -> bool {
        matches!(self, Self::Schema(_))
    }
}

/// Invalid chart axis configuration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AxisError {
    /// Lower bound above upper bound
    #[error("axis `{key}` has min {min} above max {max}")]
    Inverted {
        /// Series the axis belongs to
        key: String,
        /// Configured lower bound
        min: f64,
        /// Configured upper bound
        max: f64,
    },

    /// NaN or infinite bound
    #[error("axis `{key}` has a non-finite bound")]
    NonFinite {
        /// Series the axis belongs to
        key: String,
    },

    /// Nothing to draw
    #[error("no series configured")]
    NoSeries,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_display() {
        let err = DecodeError::Parse("expected value at line 1 column 1".to_string());
        assert!(err.to_string().contains("malformed frame"));
        assert!(err.is_parse());
        assert!(!err.is_schema());
    }

    #[test]
    fn axis_error_display() {
        let err = AxisError::Inverted {
            key: "loss".to_string(),
            min: 2.0,
            max: 0.0,
        };
        assert_eq!(err.to_string(), "axis `loss` has min 2 above max 0");
    }
}
