//! Named uniforms and their WGSL memory layout
//!
//! Every program declares a [`UniformLayout`]: the scalar fields of one uniform
//! block (bound at binding 0) plus any number of storage arrays (bindings 1..).
//! Uniforms are addressed by name, e.g. `uMatrices.world` for a block field or
//! `uLights.point[3].position` for a field of an array element. Array lengths
//! follow a block field named by the array's count uniform.
//!
//! Offsets follow the WGSL host-shareable layout rules, so a flat WGSL struct
//! declared with the same fields in the same order matches byte for byte.

use glam::{Mat4, Vec2, Vec3, Vec4};
use std::collections::HashMap;

/// Value of a single uniform
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    UInt(u32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    pub fn ty(&self) -> UniformType {
        match self {
            UniformValue::Bool(_) => UniformType::Bool,
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::UInt(_) => UniformType::UInt,
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Vec2(_) => UniformType::Vec2,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
            UniformValue::Mat4(_) => UniformType::Mat4,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            UniformValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u32> {
        match self {
            UniformValue::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vec4(&self) -> Option<Vec4> {
        match self {
            UniformValue::Vec4(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_mat4(&self) -> Option<Mat4> {
        match self {
            UniformValue::Mat4(v) => Some(*v),
            _ => None,
        }
    }

    /// Write the value at `offset`; booleans are stored as `u32`
    fn write(&self, dst: &mut [u8], offset: usize) {
        let bytes: Vec<u8> = match self {
            UniformValue::Bool(v) => u32::from(*v).to_le_bytes().to_vec(),
            UniformValue::Int(v) => v.to_le_bytes().to_vec(),
            UniformValue::UInt(v) => v.to_le_bytes().to_vec(),
            UniformValue::Float(v) => v.to_le_bytes().to_vec(),
            UniformValue::Vec2(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
            UniformValue::Vec3(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
            UniformValue::Vec4(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
            UniformValue::Mat4(v) => bytemuck::cast_slice(&v.to_cols_array()).to_vec(),
        };
        dst[offset..offset + bytes.len()].copy_from_slice(&bytes);
    }
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        UniformValue::Bool(v)
    }
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        UniformValue::UInt(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        UniformValue::Mat4(v)
    }
}

/// Shader-side type of a uniform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformType {
    Bool,
    Int,
    UInt,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformType {
    pub fn align(&self) -> usize {
        match self {
            UniformType::Bool | UniformType::Int | UniformType::UInt | UniformType::Float => 4,
            UniformType::Vec2 => 8,
            UniformType::Vec3 | UniformType::Vec4 | UniformType::Mat4 => 16,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            UniformType::Bool | UniformType::Int | UniformType::UInt | UniformType::Float => 4,
            UniformType::Vec2 => 8,
            UniformType::Vec3 => 12,
            UniformType::Vec4 => 16,
            UniformType::Mat4 => 64,
        }
    }
}

fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

/// A field placed inside a struct
#[derive(Debug, Clone)]
pub struct UniformField {
    pub name: String,
    pub ty: UniformType,
    pub offset: usize,
}

/// Struct layout computed with WGSL alignment rules
#[derive(Debug, Clone, Default)]
pub struct StructLayout {
    fields: Vec<UniformField>,
    size: usize,
    align: usize,
}

impl StructLayout {
    fn push(&mut self, name: &str, ty: UniformType) {
        let end = self.fields.last().map_or(0, |f| f.offset + f.ty.size());
        let offset = round_up(end, ty.align());
        self.align = self.align.max(ty.align());
        self.size = round_up(offset + ty.size(), self.align);
        self.fields.push(UniformField {
            name: name.to_string(),
            ty,
            offset,
        });
    }

    pub fn field(&self, name: &str) -> Option<&UniformField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[UniformField] {
        &self.fields
    }

    /// Struct size, which is also the array stride of the struct
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A runtime-sized storage array of structs
#[derive(Debug, Clone)]
pub struct ArrayLayout {
    pub prefix: String,
    pub count_uniform: String,
    pub element: StructLayout,
}

/// Resolved location of a named uniform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformSlot {
    Block { offset: usize, ty: UniformType },
    Array {
        array: usize,
        index: usize,
        offset: usize,
        ty: UniformType,
    },
}

impl UniformSlot {
    pub fn ty(&self) -> UniformType {
        match self {
            UniformSlot::Block { ty, .. } | UniformSlot::Array { ty, .. } => *ty,
        }
    }
}

/// Uniform layout of a program
#[derive(Debug, Clone, Default)]
pub struct UniformLayout {
    block: StructLayout,
    arrays: Vec<ArrayLayout>,
}

impl UniformLayout {
    pub fn builder() -> UniformLayoutBuilder {
        UniformLayoutBuilder::default()
    }

    pub fn block(&self) -> &StructLayout {
        &self.block
    }

    pub fn arrays(&self) -> &[ArrayLayout] {
        &self.arrays
    }

    /// Resolve a uniform name to its location
    pub fn resolve(&self, name: &str) -> Option<UniformSlot> {
        if let Some(field) = self.block.field(name) {
            return Some(UniformSlot::Block {
                offset: field.offset,
                ty: field.ty,
            });
        }

        let (prefix, rest) = name.split_once('[')?;
        let (index, field_name) = rest.split_once("].")?;
        let index: usize = index.parse().ok()?;
        let (array, layout) = self
            .arrays
            .iter()
            .enumerate()
            .find(|(_, a)| a.prefix == prefix)?;
        let field = layout.element.field(field_name)?;
        Some(UniformSlot::Array {
            array,
            index,
            offset: index * layout.element.size() + field.offset,
            ty: field.ty,
        })
    }

    /// Pack a set of values into the block and array buffers.
    ///
    /// Each array buffer holds as many elements as its count uniform says,
    /// never fewer than one. Elements past the count are dropped.
    pub fn pack(&self, values: &HashMap<String, UniformValue>) -> PackedUniforms {
        let mut block = vec![0u8; self.block.size()];

        let counts: Vec<usize> = self
            .arrays
            .iter()
            .map(|a| match values.get(&a.count_uniform) {
                Some(UniformValue::UInt(n)) => *n as usize,
                Some(UniformValue::Int(n)) => (*n).max(0) as usize,
                _ => 0,
            })
            .collect();
        let mut arrays: Vec<Vec<u8>> = self
            .arrays
            .iter()
            .zip(&counts)
            .map(|(a, count)| vec![0u8; a.element.size() * (*count).max(1)])
            .collect();

        for (name, value) in values {
            match self.resolve(name) {
                Some(UniformSlot::Block { offset, ty }) if ty == value.ty() => {
                    value.write(&mut block, offset);
                }
                Some(UniformSlot::Array {
                    array,
                    index,
                    offset,
                    ty,
                }) if ty == value.ty() && index < counts[array] => {
                    value.write(&mut arrays[array], offset);
                }
                _ => {}
            }
        }

        PackedUniforms { block, arrays }
    }
}

/// Builder for [`UniformLayout`]
#[derive(Debug, Default)]
pub struct UniformLayoutBuilder {
    layout: UniformLayout,
}

impl UniformLayoutBuilder {
    pub fn field(mut self, name: &str, ty: UniformType) -> Self {
        self.layout.block.push(name, ty);
        self
    }

    /// Declare a storage array whose length is read from `count_uniform`.
    ///
    /// The count uniform is added to the block as a `u32` field if it is not
    /// declared yet.
    pub fn array(mut self, prefix: &str, count_uniform: &str, fields: &[(&str, UniformType)]) -> Self {
        if self.layout.block.field(count_uniform).is_none() {
            self.layout.block.push(count_uniform, UniformType::UInt);
        }
        let mut element = StructLayout::default();
        for (name, ty) in fields {
            element.push(name, *ty);
        }
        self.layout.arrays.push(ArrayLayout {
            prefix: prefix.to_string(),
            count_uniform: count_uniform.to_string(),
            element,
        });
        self
    }

    pub fn build(self) -> UniformLayout {
        self.layout
    }
}

/// Packed uniform bytes for one draw
#[derive(Debug, Clone)]
pub struct PackedUniforms {
    pub block: Vec<u8>,
    pub arrays: Vec<Vec<u8>>,
}

/// Current uniform values of one program
#[derive(Debug, Clone, Default)]
pub struct ProgramUniforms {
    layout: UniformLayout,
    values: HashMap<String, UniformValue>,
}

impl ProgramUniforms {
    pub fn new(layout: UniformLayout) -> Self {
        Self {
            layout,
            values: HashMap::new(),
        }
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    pub fn values(&self) -> &HashMap<String, UniformValue> {
        &self.values
    }

    /// Store a value; names the layout does not know are ignored
    pub fn set(&mut self, name: &str, value: UniformValue) {
        match self.layout.resolve(name) {
            Some(slot) if slot.ty() == value.ty() => {
                self.values.insert(name.to_string(), value);
            }
            Some(slot) => {
                log::warn!(
                    "Uniform '{}' expects {:?}, got {:?}; ignored",
                    name,
                    slot.ty(),
                    value.ty()
                );
            }
            None => {
                log::trace!("Uniform '{}' is not used by the program", name);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<UniformValue> {
        self.values.get(name).copied()
    }

    pub fn pack(&self) -> PackedUniforms {
        self.layout.pack(&self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light_layout() -> UniformLayout {
        UniformLayout::builder()
            .field("uCamera.position", UniformType::Vec3)
            .array(
                "uLights.directional",
                "uLights.directionalCount",
                &[
                    ("base.color", UniformType::Vec3),
                    ("base.intensity", UniformType::Float),
                    ("direction", UniformType::Vec3),
                ],
            )
            .array(
                "uLights.spot",
                "uLights.spotCount",
                &[
                    ("base.color", UniformType::Vec3),
                    ("base.intensity", UniformType::Float),
                    ("position", UniformType::Vec3),
                    ("radius", UniformType::Float),
                    ("direction", UniformType::Vec3),
                    ("cutOff", UniformType::Float),
                    ("outerCutOff", UniformType::Float),
                ],
            )
            .build()
    }

    #[test]
    fn test_block_offsets_follow_wgsl_rules() {
        let layout = UniformLayout::builder()
            .field("a", UniformType::Float)
            .field("b", UniformType::Vec3)
            .field("c", UniformType::Float)
            .field("d", UniformType::Mat4)
            .field("e", UniformType::Bool)
            .build();
        let offsets: Vec<usize> = layout.block().fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 16, 28, 32, 96]);
        assert_eq!(layout.block().size(), 112);
    }

    #[test]
    fn test_array_strides() {
        let layout = light_layout();
        assert_eq!(layout.arrays()[0].element.size(), 32);
        assert_eq!(layout.arrays()[1].element.size(), 64);
        // count uniforms were appended to the block
        assert!(layout.block().field("uLights.directionalCount").is_some());
        assert!(layout.block().field("uLights.spotCount").is_some());
    }

    #[test]
    fn test_resolve_array_element() {
        let layout = light_layout();
        let slot = layout.resolve("uLights.spot[2].cutOff").unwrap();
        assert_eq!(
            slot,
            UniformSlot::Array {
                array: 1,
                index: 2,
                offset: 2 * 64 + 44,
                ty: UniformType::Float
            }
        );
        assert!(layout.resolve("uLights.spot[2].missing").is_none());
        assert!(layout.resolve("uLights.area[0].position").is_none());
        assert!(layout.resolve("uUnknown").is_none());
    }

    #[test]
    fn test_pack_sizes_arrays_to_count() {
        let layout = light_layout();
        let mut uniforms = ProgramUniforms::new(layout);
        uniforms.set("uLights.directionalCount", UniformValue::UInt(3));
        uniforms.set("uLights.directional[1].base.intensity", UniformValue::Float(2.5));
        uniforms.set("uLights.spot[0].radius", UniformValue::Float(4.0));

        let packed = uniforms.pack();
        assert_eq!(packed.arrays[0].len(), 3 * 32);
        // spot count unset: one zeroed element, value beyond the count dropped
        assert_eq!(packed.arrays[1].len(), 64);
        assert!(packed.arrays[1].iter().all(|b| *b == 0));

        let at = 32 + 12;
        let intensity = f32::from_le_bytes(packed.arrays[0][at..at + 4].try_into().unwrap());
        assert_eq!(intensity, 2.5);
    }

    #[test]
    fn test_mismatched_type_is_ignored() {
        let mut uniforms = ProgramUniforms::new(light_layout());
        uniforms.set("uCamera.position", UniformValue::Float(1.0));
        assert!(uniforms.get("uCamera.position").is_none());
        uniforms.set("uCamera.position", UniformValue::Vec3(Vec3::ONE));
        assert_eq!(uniforms.get("uCamera.position"), Some(UniformValue::Vec3(Vec3::ONE)));
    }
}
