//! System V AMD64 classification of aggregates.
//!
//! A structure passed or returned by value is split into eightbytes; each
//! eightbyte is INTEGER if any byte in it holds an integer or pointer, SSE
//! if every byte is floating, and the whole aggregate goes to MEMORY when
//! it is larger than 16 bytes.

use crate::types::{StructId, Type, TypeTable};
use smallvec::SmallVec;

/// The class of one eightbyte.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Class {
    /// Passed in a general-purpose register.
    Integer,
    /// Passed in an SSE register.
    Sse,
    /// Passed on the stack.
    Memory,
}

/// Classify the eightbytes of `struct id`.
pub fn classify_struct(types: &TypeTable, id: StructId) -> SmallVec<[Class; 2]> {
    let size = Type::Struct(id).size(types);
    let count = size.div_ceil(8) as usize;
    if size > 16 {
        return (0..count).map(|_| Class::Memory).collect();
    }
    let mut leaves = Vec::new();
    flatten(types, &Type::Struct(id), 0, &mut leaves);
    (0..count)
        .map(|i| {
            let lo = i as u64 * 8;
            let hi = lo + 8;
            let all_double = leaves
                .iter()
                .filter(|(off, ty)| *off < hi && off + ty.size(types) > lo)
                .all(|(_, ty)| *ty == Type::Double);
            if all_double {
                Class::Sse
            } else {
                Class::Integer
            }
        })
        .collect()
}

/// Collect the scalar leaves of `ty` with their byte offsets.
fn flatten(types: &TypeTable, ty: &Type, base: u64, out: &mut Vec<(u64, Type)>) {
    match ty {
        Type::Struct(id) => {
            let layout = types.layout(*id).expect("classified struct is complete");
            // Clone to release the borrow before recursing.
            let members: Vec<_> = layout
                .members
                .iter()
                .map(|m| (m.offset, m.ty.clone()))
                .collect();
            for (offset, mty) in members {
                flatten(types, &mty, base + offset, out);
            }
        }
        Type::Array(elem, n) => {
            let esize = elem.size(types);
            for i in 0..*n {
                flatten(types, elem, base + i * esize, out);
            }
        }
        scalar => out.push((base, scalar.clone())),
    }
}

/// Does a value of `ty` return through a hidden pointer?
pub fn returns_in_memory(types: &TypeTable, ty: &Type) -> bool {
    match ty {
        Type::Struct(id) => classify_struct(types, *id)[0] == Class::Memory,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceLoc;

    fn complete(types: &mut TypeTable, tag: &str, members: Vec<(&str, Type)>) -> StructId {
        let id = types.declare(tag);
        types
            .complete(
                id,
                members
                    .into_iter()
                    .map(|(n, t)| (n.to_string(), t))
                    .collect(),
                SourceLoc::default(),
            )
            .unwrap();
        id
    }

    #[test]
    fn small_integer_struct() {
        let mut types = TypeTable::new();
        let id = complete(&mut types, "s", vec![("a", Type::Int), ("b", Type::Int)]);
        assert_eq!(classify_struct(&types, id).as_slice(), &[Class::Integer]);
    }

    #[test]
    fn mixed_eightbytes() {
        let mut types = TypeTable::new();
        // {double; int}: first eightbyte all floating, second integer.
        let id = complete(&mut types, "s", vec![("d", Type::Double), ("i", Type::Int)]);
        assert_eq!(
            classify_struct(&types, id).as_slice(),
            &[Class::Sse, Class::Integer]
        );
    }

    #[test]
    fn two_doubles_are_sse() {
        let mut types = TypeTable::new();
        let id = complete(
            &mut types,
            "s",
            vec![("a", Type::Double), ("b", Type::Double)],
        );
        assert_eq!(
            classify_struct(&types, id).as_slice(),
            &[Class::Sse, Class::Sse]
        );
    }

    #[test]
    fn char_beside_double_forces_integer() {
        let mut types = TypeTable::new();
        // {char; double}: the double lands in the second eightbyte; the
        // first holds the char plus padding.
        let id = complete(&mut types, "s", vec![("c", Type::Char), ("d", Type::Double)]);
        assert_eq!(
            classify_struct(&types, id).as_slice(),
            &[Class::Integer, Class::Sse]
        );
    }

    #[test]
    fn large_struct_is_memory() {
        let mut types = TypeTable::new();
        let id = complete(
            &mut types,
            "s",
            vec![("a", Type::Double), ("b", Type::Double), ("c", Type::Int)],
        );
        assert_eq!(
            classify_struct(&types, id).as_slice(),
            &[Class::Memory, Class::Memory, Class::Memory]
        );
        assert!(returns_in_memory(&types, &Type::Struct(id)));
    }
}
