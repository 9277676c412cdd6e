//! Uniform block layout for GPU programs.
//!
//! Every program receives its named parameters in one uniform buffer at
//! `@group(0) @binding(0)`. Offsets follow the WGSL uniform address space
//! rules so the block can be declared as a plain WGSL struct in the same
//! field order:
//!
//! | kind          | align | size      |
//! |---------------|-------|-----------|
//! | bool/int/f32  | 4     | 4         |
//! | vec2          | 8     | 8         |
//! | vec3          | 16    | 12        |
//! | vec4          | 16    | 16        |
//! | mat4x4        | 16    | 64        |
//! | array<vec3,N> | 16    | 16 × N    |
//!
//! `bool` is not host-shareable in WGSL and is stored as `u32`.

use super::UniformValue;

/// Smallest uniform buffer handed to a program.
pub const MIN_UNIFORM_SIZE: u64 = 16;

/// Type of one field in a program's uniform block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Bool,
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    /// `array<vec3<f32>, N>`, 16-byte stride.
    Vec3Array(u32),
}

impl UniformKind {
    fn align(self) -> u64 {
        match self {
            UniformKind::Bool | UniformKind::Int | UniformKind::Float => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3
            | UniformKind::Vec4
            | UniformKind::Mat4
            | UniformKind::Vec3Array(_) => 16,
        }
    }

    fn size(self) -> u64 {
        match self {
            UniformKind::Bool | UniformKind::Int | UniformKind::Float => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 => 12,
            UniformKind::Vec4 => 16,
            UniformKind::Mat4 => 64,
            UniformKind::Vec3Array(n) => 16 * n as u64,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct UniformField {
    name: String,
    kind: UniformKind,
    offset: u64,
}

/// Byte layout of a program's uniform block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UniformLayout {
    fields: Vec<UniformField>,
    size: u64,
}

fn align_to(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

impl UniformLayout {
    /// Lay out `fields` in declaration order.
    pub fn new<'a>(fields: impl IntoIterator<Item = (&'a str, UniformKind)>) -> Self {
        let mut offset = 0;
        let fields: Vec<UniformField> = fields
            .into_iter()
            .map(|(name, kind)| {
                let field = UniformField {
                    name: name.to_string(),
                    kind,
                    offset: align_to(offset, kind.align()),
                };
                offset = field.offset + kind.size();
                field
            })
            .collect();
        Self {
            fields,
            size: align_to(offset, 16).max(MIN_UNIFORM_SIZE),
        }
    }

    /// Buffer size in bytes, a multiple of 16.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn offset(&self, name: &str) -> Option<u64> {
        self.field(name).map(|f| f.offset)
    }

    fn field(&self, name: &str) -> Option<&UniformField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Zeroed block of [`Self::size`] bytes.
    pub fn zeroed(&self) -> Vec<u8> {
        vec![0; self.size as usize]
    }

    /// Write `value` into `block` at the field named `name`. Returns false
    /// when the block has no such field or the value does not match its type.
    pub fn write(&self, block: &mut [u8], name: &str, value: &UniformValue) -> bool {
        let Some(field) = self.field(name) else {
            return false;
        };
        let offset = field.offset as usize;
        if block.len() < offset + field.kind.size() as usize {
            return false;
        }
        let mut put = |at: usize, bytes: &[u8]| {
            block[at..at + bytes.len()].copy_from_slice(bytes);
        };
        match (field.kind, value) {
            (UniformKind::Bool, UniformValue::Bool(v)) => {
                put(offset, bytemuck::bytes_of(&(*v as u32)))
            }
            (UniformKind::Int, UniformValue::Int(v)) => put(offset, bytemuck::bytes_of(v)),
            (UniformKind::Float, UniformValue::Float(v)) => put(offset, bytemuck::bytes_of(v)),
            (UniformKind::Vec2, UniformValue::Vec2(v)) => {
                put(offset, bytemuck::cast_slice(&v.to_array()))
            }
            (UniformKind::Vec3, UniformValue::Vec3(v)) => {
                put(offset, bytemuck::cast_slice(&v.to_array()))
            }
            (UniformKind::Vec4, UniformValue::Vec4(v)) => {
                put(offset, bytemuck::cast_slice(&v.to_array()))
            }
            (UniformKind::Mat4, UniformValue::Mat4(v)) => {
                put(offset, bytemuck::cast_slice(&v.to_cols_array()))
            }
            (UniformKind::Vec3Array(n), UniformValue::Vec3Array(values)) => {
                // Extra elements are dropped, missing ones keep their bytes.
                for (i, v) in values.iter().take(n as usize).enumerate() {
                    put(offset + 16 * i, bytemuck::cast_slice(&v.to_array()));
                }
            }
            _ => return false,
        }
        true
    }
}
