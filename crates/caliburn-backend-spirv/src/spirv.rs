//! SPIR-V binary format constants.
//!
//! Opcode and enumerant values from the SPIR-V 1.5 unified reference and
//! the GLSL.std.450 extended instruction set. Only what the translator emits
//! is listed.

/// First word of every module.
pub const MAGIC: u32 = 0x0723_0203;

/// Generator id written into the header.
pub const GENERATOR: u32 = 1975;

/// Header word count (magic, version, generator, bound, schema).
pub const HEADER_WORDS: usize = 5;

/// Version word for `major.minor`.
pub const fn version(major: u8, minor: u8) -> u32 {
    ((major as u32) << 16) | ((minor as u32) << 8)
}

/// First word of an instruction.
pub const fn instruction_header(word_count: u16, opcode: u16) -> u32 {
    ((word_count as u32) << 16) | opcode as u32
}

/// Packs a UTF-8 literal string: 4 bytes per word, little-endian, null
/// terminated. A string whose length is a multiple of 4 gets a whole null word.
pub fn pack_string(s: &str) -> Vec<u32> {
    let bytes = s.as_bytes();
    let mut words: Vec<u32> = bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect();
    if bytes.len() % 4 == 0 {
        words.push(0);
    }
    words
}

/// Instruction opcodes.
pub mod op {
    pub const NAME: u16 = 5;
    pub const MEMBER_NAME: u16 = 6;
    pub const EXTENSION: u16 = 10;
    pub const EXT_INST_IMPORT: u16 = 11;
    pub const EXT_INST: u16 = 12;
    pub const MEMORY_MODEL: u16 = 14;
    pub const ENTRY_POINT: u16 = 15;
    pub const EXECUTION_MODE: u16 = 16;
    pub const CAPABILITY: u16 = 17;

    pub const TYPE_VOID: u16 = 19;
    pub const TYPE_BOOL: u16 = 20;
    pub const TYPE_INT: u16 = 21;
    pub const TYPE_FLOAT: u16 = 22;
    pub const TYPE_VECTOR: u16 = 23;
    pub const TYPE_MATRIX: u16 = 24;
    pub const TYPE_ARRAY: u16 = 28;
    pub const TYPE_STRUCT: u16 = 30;
    pub const TYPE_POINTER: u16 = 32;
    pub const TYPE_FUNCTION: u16 = 33;

    pub const CONSTANT_TRUE: u16 = 41;
    pub const CONSTANT_FALSE: u16 = 42;
    pub const CONSTANT: u16 = 43;
    pub const CONSTANT_COMPOSITE: u16 = 44;
    pub const CONSTANT_NULL: u16 = 46;

    pub const FUNCTION: u16 = 54;
    pub const FUNCTION_PARAMETER: u16 = 55;
    pub const FUNCTION_END: u16 = 56;
    pub const FUNCTION_CALL: u16 = 57;

    pub const VARIABLE: u16 = 59;
    pub const LOAD: u16 = 61;
    pub const STORE: u16 = 62;
    pub const ACCESS_CHAIN: u16 = 65;

    pub const DECORATE: u16 = 71;
    pub const MEMBER_DECORATE: u16 = 72;

    pub const VECTOR_EXTRACT_DYNAMIC: u16 = 77;
    pub const VECTOR_SHUFFLE: u16 = 79;
    pub const COMPOSITE_CONSTRUCT: u16 = 80;
    pub const COMPOSITE_EXTRACT: u16 = 81;

    pub const CONVERT_S_TO_F: u16 = 111;
    pub const CONVERT_U_TO_F: u16 = 112;
    pub const U_CONVERT: u16 = 113;
    pub const S_CONVERT: u16 = 114;
    pub const F_CONVERT: u16 = 115;
    pub const BITCAST: u16 = 124;

    pub const S_NEGATE: u16 = 126;
    pub const F_NEGATE: u16 = 127;
    pub const I_ADD: u16 = 128;
    pub const F_ADD: u16 = 129;
    pub const I_SUB: u16 = 130;
    pub const F_SUB: u16 = 131;
    pub const I_MUL: u16 = 132;
    pub const F_MUL: u16 = 133;
    pub const U_DIV: u16 = 134;
    pub const S_DIV: u16 = 135;
    pub const F_DIV: u16 = 136;
    pub const U_MOD: u16 = 137;
    pub const S_MOD: u16 = 139;
    pub const F_MOD: u16 = 141;

    pub const LOGICAL_EQUAL: u16 = 164;
    pub const LOGICAL_NOT_EQUAL: u16 = 165;
    pub const LOGICAL_OR: u16 = 166;
    pub const LOGICAL_AND: u16 = 167;
    pub const LOGICAL_NOT: u16 = 168;
    pub const SELECT: u16 = 169;

    pub const I_EQUAL: u16 = 170;
    pub const I_NOT_EQUAL: u16 = 171;
    pub const U_GREATER_THAN: u16 = 172;
    pub const S_GREATER_THAN: u16 = 173;
    pub const U_GREATER_THAN_EQUAL: u16 = 174;
    pub const S_GREATER_THAN_EQUAL: u16 = 175;
    pub const U_LESS_THAN: u16 = 176;
    pub const S_LESS_THAN: u16 = 177;
    pub const U_LESS_THAN_EQUAL: u16 = 178;
    pub const S_LESS_THAN_EQUAL: u16 = 179;
    pub const F_ORD_EQUAL: u16 = 180;
    pub const F_ORD_NOT_EQUAL: u16 = 182;
    pub const F_ORD_LESS_THAN: u16 = 184;
    pub const F_ORD_GREATER_THAN: u16 = 186;
    pub const F_ORD_LESS_THAN_EQUAL: u16 = 188;
    pub const F_ORD_GREATER_THAN_EQUAL: u16 = 190;

    pub const SHIFT_RIGHT_LOGICAL: u16 = 194;
    pub const SHIFT_RIGHT_ARITHMETIC: u16 = 195;
    pub const SHIFT_LEFT_LOGICAL: u16 = 196;
    pub const BITWISE_OR: u16 = 197;
    pub const BITWISE_XOR: u16 = 198;
    pub const BITWISE_AND: u16 = 199;
    pub const NOT: u16 = 200;

    pub const LOOP_MERGE: u16 = 246;
    pub const LABEL: u16 = 248;
    pub const BRANCH: u16 = 249;
    pub const BRANCH_CONDITIONAL: u16 = 250;
    pub const KILL: u16 = 252;
    pub const RETURN: u16 = 253;
    pub const RETURN_VALUE: u16 = 254;
    pub const UNREACHABLE: u16 = 255;
}

/// `StorageClass` enumerants.
pub mod storage_class {
    pub const INPUT: u32 = 1;
    pub const UNIFORM: u32 = 2;
    pub const OUTPUT: u32 = 3;
    pub const WORKGROUP: u32 = 4;
    pub const PRIVATE: u32 = 6;
    pub const FUNCTION: u32 = 7;
}

/// `Decoration` enumerants.
pub mod decoration {
    pub const BLOCK: u32 = 2;
    pub const BUILT_IN: u32 = 11;
    pub const LOCATION: u32 = 30;
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
    pub const OFFSET: u32 = 35;
}

/// `Capability` enumerants.
pub mod capability {
    pub const MATRIX: u32 = 0;
    pub const SHADER: u32 = 1;
    pub const GEOMETRY: u32 = 2;
    pub const TESSELLATION: u32 = 3;
    pub const FLOAT16: u32 = 9;
    pub const FLOAT64: u32 = 10;
    pub const INT64: u32 = 11;
    pub const INT16: u32 = 22;
    pub const SAMPLE_RATE_SHADING: u32 = 35;
    pub const INT8: u32 = 39;
    pub const RAY_TRACING_KHR: u32 = 4479;
    pub const MESH_SHADING_EXT: u32 = 5283;
}

/// `ExecutionModel` enumerants.
pub mod execution_model {
    pub const VERTEX: u32 = 0;
    pub const TESSELLATION_CONTROL: u32 = 1;
    pub const TESSELLATION_EVALUATION: u32 = 2;
    pub const GEOMETRY: u32 = 3;
    pub const FRAGMENT: u32 = 4;
    pub const GL_COMPUTE: u32 = 5;
    pub const RAY_GENERATION_KHR: u32 = 5313;
    pub const INTERSECTION_KHR: u32 = 5314;
    pub const ANY_HIT_KHR: u32 = 5315;
    pub const CLOSEST_HIT_KHR: u32 = 5316;
    pub const MISS_KHR: u32 = 5317;
    pub const TASK_EXT: u32 = 5364;
    pub const MESH_EXT: u32 = 5365;
}

/// `ExecutionMode` enumerants.
pub mod execution_mode {
    pub const ORIGIN_UPPER_LEFT: u32 = 7;
    pub const LOCAL_SIZE: u32 = 17;
}

/// `BuiltIn` enumerants.
pub mod built_in {
    pub const POSITION: u32 = 0;
    pub const POINT_SIZE: u32 = 1;
    pub const CLIP_DISTANCE: u32 = 3;
    pub const CULL_DISTANCE: u32 = 4;
    pub const PRIMITIVE_ID: u32 = 7;
    pub const INVOCATION_ID: u32 = 8;
    pub const TESS_COORD: u32 = 13;
    pub const PATCH_VERTICES: u32 = 14;
    pub const FRAG_COORD: u32 = 15;
    pub const POINT_COORD: u32 = 16;
    pub const FRONT_FACING: u32 = 17;
    pub const SAMPLE_ID: u32 = 18;
    pub const SAMPLE_POSITION: u32 = 19;
    pub const FRAG_DEPTH: u32 = 22;
    pub const HELPER_INVOCATION: u32 = 23;
    pub const NUM_WORKGROUPS: u32 = 24;
    pub const WORKGROUP_ID: u32 = 26;
    pub const LOCAL_INVOCATION_ID: u32 = 27;
    pub const GLOBAL_INVOCATION_ID: u32 = 28;
    pub const LOCAL_INVOCATION_INDEX: u32 = 29;
    pub const VERTEX_INDEX: u32 = 42;
    pub const INSTANCE_INDEX: u32 = 43;
}

pub const ADDRESSING_LOGICAL: u32 = 0;
pub const MEMORY_MODEL_GLSL450: u32 = 1;

/// `OpLoopMerge` control mask with no hints.
pub const LOOP_CONTROL_NONE: u32 = 0;

/// GLSL.std.450 extended instructions.
pub mod glsl {
    pub const SET_NAME: &str = "GLSL.std.450";
    pub const F_ABS: u32 = 4;
    pub const S_ABS: u32 = 5;
    pub const POW: u32 = 26;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_packing() {
        assert_eq!(version(1, 5), 0x0001_0500);
        assert_eq!(instruction_header(2, op::LABEL), 0x0002_00F8);
    }

    #[test]
    fn strings_are_null_terminated() {
        assert_eq!(pack_string("main"), vec![0x6E69_616D, 0]);
        assert_eq!(pack_string("abc"), vec![0x0063_6261]);
        assert_eq!(pack_string(""), vec![0]);
        assert_eq!(pack_string("GLSL.std.450").len(), 4);
    }
}
