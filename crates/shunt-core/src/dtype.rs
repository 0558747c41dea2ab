use std::fmt;

/// Element types a `Tensor` can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit IEEE 754 single-precision float
    F32,
    /// 64-bit IEEE 754 double-precision float
    F64,
    /// 32-bit signed integer
    I32,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn element_size(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F64 => 8,
        }
    }

    /// Number of bytes needed to store `n` elements of this dtype.
    pub fn storage_bytes(&self, n: usize) -> usize {
        self.element_size() * n
    }

    /// Whether this dtype is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
            DType::I32 => write!(f, "i32"),
        }
    }
}

impl std::str::FromStr for DType {
    type Err = crate::ShuntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "f32" | "float32" => Ok(DType::F32),
            "f64" | "float64" => Ok(DType::F64),
            "i32" | "int32" => Ok(DType::I32),
            other => Err(crate::ShuntError::UnknownName {
                kind: "dtype",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_bytes() {
        assert_eq!(DType::F32.storage_bytes(10), 40);
        assert_eq!(DType::F64.storage_bytes(3), 24);
        assert_eq!(DType::I32.storage_bytes(0), 0);
    }

    #[test]
    fn test_dtype_categories() {
        assert!(DType::F32.is_float());
        assert!(DType::F64.is_float());
        assert!(!DType::I32.is_float());
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("f64".parse::<DType>().unwrap(), DType::F64);
        assert_eq!("Float32".parse::<DType>().unwrap(), DType::F32);
        let err = "bf16".parse::<DType>().unwrap_err();
        assert!(matches!(err, crate::ShuntError::UnknownName { kind: "dtype", .. }));
        assert_eq!(err.to_string(), "Unknown dtype 'bf16'");
        assert_eq!(format!("{}", DType::I32), "i32");
    }
}
