//! Catalog of shader built-ins and the stages that may use them.

use caliburn_ir::{BuiltIn, ShaderStage};

use crate::spirv::{built_in, capability, storage_class};

/// Shape of a built-in variable's value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuiltInType {
    Bool,
    Int,
    Uint,
    Float,
    Vec2,
    Vec3,
    Vec4,
    UVec3,
}

#[derive(Clone, Copy, Debug)]
pub struct BuiltInInfo {
    pub spirv: u32,
    pub storage_class: u32,
    pub ty: BuiltInType,
    pub capabilities: &'static [u32],
    pub stages: &'static [ShaderStage],
}

impl BuiltInInfo {
    pub fn is_legal_in(&self, stage: ShaderStage) -> bool {
        self.stages.contains(&stage)
    }
}

use ShaderStage::*;

const PRE_RASTER: &[ShaderStage] = &[Vertex, TessCtrl, TessEval, Geometry, Mesh];
const VERTEX: &[ShaderStage] = &[Vertex];
const FRAGMENT: &[ShaderStage] = &[Fragment];
const WORKGROUP: &[ShaderStage] = &[Compute, Task, Mesh];
const TESSELLATION: &[ShaderStage] = &[TessCtrl, TessEval];

const fn entry(
    spirv: u32,
    storage_class: u32,
    ty: BuiltInType,
    capabilities: &'static [u32],
    stages: &'static [ShaderStage],
) -> BuiltInInfo {
    BuiltInInfo {
        spirv,
        storage_class,
        ty,
        capabilities,
        stages,
    }
}

const INPUT: u32 = storage_class::INPUT;
const OUTPUT: u32 = storage_class::OUTPUT;

/// Indexed by `BuiltIn` ordinal.
static CATALOG: [BuiltInInfo; BuiltIn::ALL.len()] = [
    entry(built_in::POSITION, OUTPUT, BuiltInType::Vec4, &[], PRE_RASTER),
    entry(built_in::POINT_SIZE, OUTPUT, BuiltInType::Float, &[], PRE_RASTER),
    entry(built_in::VERTEX_INDEX, INPUT, BuiltInType::Int, &[], VERTEX),
    entry(built_in::INSTANCE_INDEX, INPUT, BuiltInType::Int, &[], VERTEX),
    entry(
        built_in::PRIMITIVE_ID,
        INPUT,
        BuiltInType::Int,
        &[capability::GEOMETRY],
        &[Fragment, TessCtrl, TessEval, Geometry, RayIntersect, RayAnyHit, RayClosestHit],
    ),
    entry(
        built_in::INVOCATION_ID,
        INPUT,
        BuiltInType::Int,
        &[],
        &[TessCtrl, Geometry],
    ),
    entry(
        built_in::TESS_COORD,
        INPUT,
        BuiltInType::Vec3,
        &[capability::TESSELLATION],
        &[TessEval],
    ),
    entry(
        built_in::PATCH_VERTICES,
        INPUT,
        BuiltInType::Int,
        &[capability::TESSELLATION],
        TESSELLATION,
    ),
    entry(built_in::FRAG_COORD, INPUT, BuiltInType::Vec4, &[], FRAGMENT),
    entry(built_in::POINT_COORD, INPUT, BuiltInType::Vec2, &[], FRAGMENT),
    entry(built_in::FRONT_FACING, INPUT, BuiltInType::Bool, &[], FRAGMENT),
    entry(
        built_in::SAMPLE_ID,
        INPUT,
        BuiltInType::Int,
        &[capability::SAMPLE_RATE_SHADING],
        FRAGMENT,
    ),
    entry(
        built_in::SAMPLE_POSITION,
        INPUT,
        BuiltInType::Vec2,
        &[capability::SAMPLE_RATE_SHADING],
        FRAGMENT,
    ),
    entry(built_in::FRAG_DEPTH, OUTPUT, BuiltInType::Float, &[], FRAGMENT),
    entry(
        built_in::HELPER_INVOCATION,
        INPUT,
        BuiltInType::Bool,
        &[],
        FRAGMENT,
    ),
    entry(built_in::NUM_WORKGROUPS, INPUT, BuiltInType::UVec3, &[], WORKGROUP),
    entry(built_in::WORKGROUP_ID, INPUT, BuiltInType::UVec3, &[], WORKGROUP),
    entry(
        built_in::LOCAL_INVOCATION_ID,
        INPUT,
        BuiltInType::UVec3,
        &[],
        WORKGROUP,
    ),
    entry(
        built_in::GLOBAL_INVOCATION_ID,
        INPUT,
        BuiltInType::UVec3,
        &[],
        WORKGROUP,
    ),
    entry(
        built_in::LOCAL_INVOCATION_INDEX,
        INPUT,
        BuiltInType::Uint,
        &[],
        WORKGROUP,
    ),
];

pub fn info(builtin: BuiltIn) -> &'static BuiltInInfo {
    &CATALOG[builtin as usize]
}
