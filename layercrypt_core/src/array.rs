//! Owned row-major arrays and the plaintext bundle extracted from an asset.

use crate::error::{CipherError, Result};

/// Dense row-major array with an explicit shape.
#[derive(Clone, Debug, PartialEq)]
pub struct NdArray<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T> NdArray<T> {
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(CipherError::ShapeMismatch {
                shape,
                len: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Builds a `rows x cols` array from equally sized rows.
    pub fn from_rows<R: AsRef<[T]>>(rows: &[R]) -> Result<Self>
    where
        T: Copy,
    {
        let cols = rows.first().map_or(0, |row| row.as_ref().len());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            data.extend_from_slice(row.as_ref());
        }
        Self::new(vec![rows.len(), cols], data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> NdArray<U> {
        NdArray {
            shape: self.shape.clone(),
            data: self.data.iter().map(f).collect(),
        }
    }
}

impl<T> AsRef<NdArray<T>> for NdArray<T> {
    fn as_ref(&self) -> &NdArray<T> {
        self
    }
}

/// One mesh attribute array. Only the float variants are cipher targets;
/// integer arrays (indices, faces) pass through untouched.
#[derive(Clone, Debug, PartialEq)]
pub enum MeshArray {
    Float32(NdArray<f32>),
    Float64(NdArray<f64>),
    UInt32(NdArray<u32>),
}

impl MeshArray {
    pub fn is_float(&self) -> bool {
        matches!(self, MeshArray::Float32(_) | MeshArray::Float64(_))
    }

    pub fn len(&self) -> usize {
        match self {
            MeshArray::Float32(arr) => arr.len(),
            MeshArray::Float64(arr) => arr.len(),
            MeshArray::UInt32(arr) => arr.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            MeshArray::Float32(arr) => arr.shape(),
            MeshArray::Float64(arr) => arr.shape(),
            MeshArray::UInt32(arr) => arr.shape(),
        }
    }

    /// Float data narrowed to float32; `None` for integer arrays.
    pub fn to_f32(&self) -> Option<NdArray<f32>> {
        match self {
            MeshArray::Float32(arr) => Some(arr.clone()),
            MeshArray::Float64(arr) => Some(arr.map(|v| *v as f32)),
            MeshArray::UInt32(_) => None,
        }
    }
}

/// Ordered mesh and image arrays of one asset (PlnM).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Plaintext {
    pub meshes: Vec<MeshArray>,
    pub images: Vec<NdArray<u8>>,
}

impl Plaintext {
    pub fn new(meshes: Vec<MeshArray>, images: Vec<NdArray<u8>>) -> Self {
        Self { meshes, images }
    }

    /// Positions of the non-empty float mesh arrays, in order.
    pub fn cipher_mesh_indices(&self) -> Vec<usize> {
        self.meshes
            .iter()
            .enumerate()
            .filter(|(_, mesh)| mesh.is_float() && !mesh.is_empty())
            .map(|(idx, _)| idx)
            .collect()
    }
}
