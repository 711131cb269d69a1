//! Generic signatures and the instantiation cache.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::IrError;
use crate::instruction::Ssa;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GenericKind {
    Type,
    Const,
}

/// A concrete generic argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GenericArg {
    Type(Ssa),
    Const(u64),
}

impl GenericArg {
    pub fn kind(self) -> GenericKind {
        match self {
            Self::Type(_) => GenericKind::Type,
            Self::Const(_) => GenericKind::Const,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericName {
    pub kind: GenericKind,
    pub name: String,
    pub default: Option<GenericArg>,
}

impl GenericName {
    pub fn ty(name: impl Into<String>) -> Self {
        Self {
            kind: GenericKind::Type,
            name: name.into(),
            default: None,
        }
    }

    pub fn constant(name: impl Into<String>) -> Self {
        Self {
            kind: GenericKind::Const,
            name: name.into(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: GenericArg) -> Self {
        self.default = Some(default);
        self
    }
}

/// Parameters of a generic declaration, e.g. `vec<T, N = 4>`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenericSignature {
    pub names: Vec<GenericName>,
}

impl GenericSignature {
    pub fn new(names: Vec<GenericName>) -> Self {
        Self { names }
    }

    /// Number of leading parameters without a default.
    pub fn min_args(&self) -> usize {
        self.names
            .iter()
            .take_while(|n| n.default.is_none())
            .count()
    }

    pub fn max_args(&self) -> usize {
        self.names.len()
    }

    /// Fills defaults for missing trailing arguments and checks arity and
    /// argument kinds.
    pub fn complete(&self, args: &[GenericArg]) -> Result<Vec<GenericArg>, IrError> {
        let (min, max) = (self.min_args(), self.max_args());
        if args.len() < min || args.len() > max {
            return Err(IrError::GenericArity {
                min,
                max,
                found: args.len(),
            });
        }
        let mut full = args.to_vec();
        for name in &self.names[args.len()..] {
            match name.default {
                Some(default) => full.push(default),
                None => {
                    return Err(IrError::GenericArity {
                        min,
                        max,
                        found: args.len(),
                    });
                }
            }
        }
        for (name, arg) in self.names.iter().zip(&full) {
            if arg.kind() != name.kind {
                return Err(IrError::GenericKind {
                    name: name.name.clone(),
                    expected: match name.kind {
                        GenericKind::Type => "type",
                        GenericKind::Const => "constant",
                    },
                });
            }
        }
        Ok(full)
    }
}

/// Remembers the result of every `(declaration, arguments)` instantiation.
#[derive(Clone, Debug)]
pub struct InstantiationCache<D, V> {
    entries: HashMap<(D, Vec<GenericArg>), V>,
}

impl<D, V> Default for InstantiationCache<D, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<D: Hash + Eq + Clone, V: Clone> InstantiationCache<D, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the cached instantiation of `decl` for `args`, calling
    /// `build` with the completed argument list the first time only.
    pub fn instantiate<F>(
        &mut self,
        decl: D,
        signature: &GenericSignature,
        args: &[GenericArg],
        build: F,
    ) -> Result<V, IrError>
    where
        F: FnOnce(&[GenericArg]) -> Result<V, IrError>,
    {
        let full = signature.complete(args)?;
        let key = (decl, full);
        if let Some(hit) = self.entries.get(&key) {
            return Ok(hit.clone());
        }
        let value = build(&key.1)?;
        self.entries.insert(key, value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Assembler;

    fn vec_signature() -> GenericSignature {
        GenericSignature::new(vec![
            GenericName::ty("T"),
            GenericName::constant("N").with_default(GenericArg::Const(4)),
        ])
    }

    #[test]
    fn arity_bounds() {
        let sig = vec_signature();
        assert_eq!((sig.min_args(), sig.max_args()), (1, 2));
        assert_eq!(
            sig.complete(&[]),
            Err(IrError::GenericArity {
                min: 1,
                max: 2,
                found: 0
            })
        );
        assert_eq!(
            sig.complete(&[GenericArg::Type(Ssa(1))]).unwrap(),
            vec![GenericArg::Type(Ssa(1)), GenericArg::Const(4)]
        );
    }

    #[test]
    fn kinds_are_checked() {
        let sig = vec_signature();
        let err = sig
            .complete(&[GenericArg::Const(3), GenericArg::Const(2)])
            .unwrap_err();
        assert_eq!(
            err,
            IrError::GenericKind {
                name: "T".into(),
                expected: "type"
            }
        );
    }

    fn vec_of(
        asm: &mut Assembler,
        cache: &mut InstantiationCache<u32, Ssa>,
        builds: &mut usize,
        args: &[GenericArg],
    ) -> Result<Ssa, IrError> {
        cache.instantiate(VEC_DECL, &vec_signature(), args, |full| {
            *builds += 1;
            match (full[0], full[1]) {
                (GenericArg::Type(inner), GenericArg::Const(n)) => asm.type_vector(inner, n as u32),
                _ => unreachable!("checked by the signature"),
            }
        })
    }

    const VEC_DECL: u32 = 1;

    #[test]
    fn builds_once_per_argument_tuple() {
        let mut asm = Assembler::new();
        let f32_ = asm.type_float(32).unwrap();
        let mut cache = InstantiationCache::new();
        let mut builds = 0;

        let a = vec_of(&mut asm, &mut cache, &mut builds, &[GenericArg::Type(f32_)]).unwrap();
        let b = vec_of(
            &mut asm,
            &mut cache,
            &mut builds,
            &[GenericArg::Type(f32_), GenericArg::Const(4)],
        )
        .unwrap();
        let c = vec_of(
            &mut asm,
            &mut cache,
            &mut builds,
            &[GenericArg::Type(f32_), GenericArg::Const(2)],
        )
        .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(builds, 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failed_builds_are_not_cached() {
        let mut asm = Assembler::new();
        let f32_ = asm.type_float(32).unwrap();
        let mut cache = InstantiationCache::new();
        let mut builds = 0;
        let bad = [GenericArg::Type(f32_), GenericArg::Const(9)];
        assert!(vec_of(&mut asm, &mut cache, &mut builds, &bad).is_err());
        assert!(vec_of(&mut asm, &mut cache, &mut builds, &bad).is_err());
        assert_eq!(builds, 2);
        assert!(cache.is_empty());
    }
}
