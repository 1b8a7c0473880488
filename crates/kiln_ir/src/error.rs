//! Error types for graph construction, compilation and evaluation.
//!
//! Construction and compile errors abort the build of a context; evaluation
//! errors ([`IrError::DivideByZero`], [`IrError::AssertionFailure`]) end the
//! simulation run that raised them.

use crate::ids::NodeId;

/// Convenience alias for results carrying an [`IrError`].
pub type IrResult<T> = Result<T, IrError>;

/// Errors raised by a [`Context`](crate::context::Context) or the compiler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IrError {
    /// Two operands that must share a width do not.
    #[error("width mismatch in {op}: {lhs} vs {rhs}")]
    WidthMismatch {
        /// The operation that was being built.
        op: String,
        /// Width of the first operand.
        lhs: u32,
        /// Width of the second operand.
        rhs: u32,
    },

    /// A literal value does not fit in its declared width.
    #[error("literal {value} does not fit in {width} bits")]
    LiteralOutOfRange {
        /// The requested value, rendered in decimal or hex.
        value: String,
        /// The declared width.
        width: u32,
    },

    /// A slice or partial assignment reaches past the end of a node.
    #[error("bit range [{offset}, {offset}+{length}) is out of bounds for {node} of width {width}")]
    SliceOutOfBounds {
        /// The sliced node.
        node: NodeId,
        /// First bit of the range.
        offset: u32,
        /// Number of bits in the range.
        length: u32,
        /// Width of the sliced node.
        width: u32,
    },

    /// A memory was created while a conditional block was open.
    #[error("memories cannot be created inside a conditional block")]
    MemoryInConditional,

    /// An output port or child instance was declared while a conditional
    /// block was open. Their driver variables must live at the top level.
    #[error("{0} cannot be declared inside a conditional block")]
    DeclarationInConditional(String),

    /// A switch case value does not have the key's width.
    #[error("case value width {case} does not match switch key width {key}")]
    CaseWidthMismatch {
        /// Width of the switch key.
        key: u32,
        /// Width of the case value.
        case: u32,
    },

    /// A block was opened after the branch's else/default block.
    #[error("no block may follow an else/default block")]
    BlockAfterDefault,

    /// A block operation was requested with no open branch.
    #[error("no conditional branch is open")]
    NoOpenBranch,

    /// An assignment or block end was requested with no open block.
    #[error("no conditional block is open")]
    NoOpenBlock,

    /// A branch was still open when the context was compiled.
    #[error("{0} conditional branch(es) left open")]
    UnterminatedBranch(usize),

    /// The destination of an assignment is not a variable or output.
    #[error("{0} is not assignable")]
    NotAssignable(NodeId),

    /// A node ID does not refer to a live node of this context.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// A named port, tap or clock signal does not exist.
    #[error("unknown port '{0}'")]
    UnknownPort(String),

    /// A port name is used twice in one context.
    #[error("duplicate port name '{0}'")]
    DuplicatePort(String),

    /// An operand is unsuitable for the requested operation.
    #[error("invalid operand {node}: {reason}")]
    InvalidOperand {
        /// The offending node.
        node: NodeId,
        /// Why the node cannot be used here.
        reason: String,
    },

    /// A print format string is malformed or refers to a missing argument.
    #[error("invalid print format '{format}': {reason}")]
    InvalidFormat {
        /// The format string.
        format: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An undefined placeholder is reachable from an observable root.
    #[error("undefined value {undef} reaches {root}")]
    UndefinedNode {
        /// The undefined placeholder.
        undef: NodeId,
        /// The root that observes it.
        root: NodeId,
    },

    /// A cycle exists through non-stateful nodes.
    #[error("combinational loop through {0}")]
    CombinationalLoop(NodeId),

    /// A stateful node and its clock domain disagree.
    #[error("clock domain inconsistency at {node}: {reason}")]
    ClockDomainMismatch {
        /// The stateful node.
        node: NodeId,
        /// Description of the inconsistency.
        reason: String,
    },

    /// A division or modulo node evaluated with a zero divisor.
    #[error("division by zero at {node} in tick {tick}")]
    DivideByZero {
        /// The division node.
        node: NodeId,
        /// Simulation tick of the evaluation.
        tick: u64,
    },

    /// An assertion node evaluated to false.
    #[error("assertion failure at tick {tick}: {message}")]
    AssertionFailure {
        /// Simulation tick of the failure.
        tick: u64,
        /// The assertion's message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_mismatch_display() {
        let e = IrError::WidthMismatch {
            op: "add".into(),
            lhs: 4,
            rhs: 8,
        };
        assert_eq!(e.to_string(), "width mismatch in add: 4 vs 8");
    }

    #[test]
    fn slice_out_of_bounds_display() {
        let e = IrError::SliceOutOfBounds {
            node: NodeId::from_raw(3),
            offset: 6,
            length: 4,
            width: 8,
        };
        assert_eq!(
            e.to_string(),
            "bit range [6, 6+4) is out of bounds for #3 of width 8"
        );
    }

    #[test]
    fn assertion_failure_display() {
        let e = IrError::AssertionFailure {
            tick: 12,
            message: "count overflow".into(),
        };
        assert_eq!(e.to_string(), "assertion failure at tick 12: count overflow");
    }

    #[test]
    fn divide_by_zero_display() {
        let e = IrError::DivideByZero {
            node: NodeId::from_raw(9),
            tick: 4,
        };
        assert_eq!(e.to_string(), "division by zero at #9 in tick 4");
    }

    #[test]
    fn unterminated_branch_display() {
        assert_eq!(
            IrError::UnterminatedBranch(2).to_string(),
            "2 conditional branch(es) left open"
        );
    }

    #[test]
    fn case_width_mismatch_display() {
        let e = IrError::CaseWidthMismatch { key: 2, case: 3 };
        assert_eq!(
            e.to_string(),
            "case value width 3 does not match switch key width 2"
        );
    }
}
