use smallvec::SmallVec;
use std::fmt;

/// Dimensions of a tensor, stored inline for up to 4 axes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    /// Zero-dimensional shape holding a single element.
    pub fn scalar() -> Self {
        Self {
            dims: SmallVec::new(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements. A scalar has one.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Resolve a reshape target against this shape's element count.
    ///
    /// One axis may be `-1` and is inferred. Returns `None` when the target
    /// is malformed or does not cover the same number of elements.
    pub fn resolve_reshape(&self, target: &[isize]) -> Option<Shape> {
        let numel = self.numel();
        let mut inferred = None;
        let mut known: usize = 1;

        for (i, &d) in target.iter().enumerate() {
            match d {
                -1 if inferred.is_none() => inferred = Some(i),
                d if d >= 0 => known = known.checked_mul(d as usize)?,
                _ => return None,
            }
        }

        let mut dims: SmallVec<[usize; 4]> =
            target.iter().map(|&d| d.max(0) as usize).collect();
        if let Some(axis) = inferred {
            if known == 0 || numel % known != 0 {
                return None;
            }
            dims[axis] = numel / known;
        }

        let resolved = Shape { dims };
        (resolved.numel() == numel).then_some(resolved)
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}
