use crate::arg::Arg;

/// A descriptor-level operand of a primitive: which argument it is and how the primitive uses it.
#[derive(Debug, Copy, Clone)]
pub struct Operand<T> {
    pub arg: Arg,
    pub kind: OperandKind,
    pub value: T,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OperandKind {
    /// Memory is read, nothing is written.
    In,
    /// Memory is written, nothing is read.
    Out,
    /// A runtime attribute value, read once per execution.
    Attr,
}

impl<T> Operand<T> {
    pub fn new_in(arg: Arg, value: T) -> Self {
        Operand {
            arg,
            kind: OperandKind::In,
            value,
        }
    }

    pub fn new_out(arg: Arg, value: T) -> Self {
        Operand {
            arg,
            kind: OperandKind::Out,
            value,
        }
    }

    pub fn new_attr(arg: Arg, value: T) -> Self {
        Operand {
            arg,
            kind: OperandKind::Attr,
            value,
        }
    }

    pub fn map_value<K>(self, f: impl FnOnce(T) -> K) -> Operand<K> {
        Operand {
            arg: self.arg,
            kind: self.kind,
            value: f(self.value),
        }
    }
}
