//! Unrecoverable translation failures.

use caliburn_ir::{BuiltIn, ErrorKind, Opcode, ShaderStage};

/// A problem that stops translation. Everything else is recorded and
/// lowering carries on.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    #[error("built-in `{builtin}` is not available in {stage} shaders")]
    IllegalBuiltIn { builtin: BuiltIn, stage: ShaderStage },

    #[error("built-in `{0}` used outside of a shader stage")]
    BuiltInOutsideStage(BuiltIn),

    #[error("{0} has no SPIR-V lowering")]
    Unsupported(Opcode),
}

impl TranslateError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::BinaryTarget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_builtin_and_stage() {
        let err = TranslateError::IllegalBuiltIn {
            builtin: BuiltIn::VertexIndex,
            stage: ShaderStage::Fragment,
        };
        assert_eq!(
            err.to_string(),
            "built-in `vertex_index` is not available in frag shaders"
        );
        assert_eq!(err.kind(), ErrorKind::BinaryTarget);
        assert_eq!(
            TranslateError::Unsupported(Opcode::Unknown).to_string(),
            "UNKNOWN has no SPIR-V lowering"
        );
    }
}
