//! Kiln IR: the dataflow graph of a hardware design, plus its compiler and
//! two-phase evaluator.
//!
//! A [`Context`] owns one circuit. Its factory methods create nodes
//! (literals, ports, variables, ALU operators, selects, proxies, registers,
//! latches, memories, instances, asserts, prints, user-defined functions
//! and the time source), its conditional API lowers `if`/`switch`
//! assignments into multiplexer trees, [`Compiler`] checks and prunes the
//! finished graph, and `tick_next`/`tick`/`eval` run it cycle by cycle.
//!
//! # Usage
//!
//! ```
//! use kiln_ir::{AluOp, Context};
//!
//! let mut ctx = Context::new("adder");
//! let a = ctx.input("a", 8).unwrap();
//! let b = ctx.input("b", 8).unwrap();
//! let sum = ctx.alu2(AluOp::Add, a, b).unwrap();
//! let out = ctx.output("sum", 8).unwrap();
//! ctx.assign(out, sum).unwrap();
//! ctx.compile().unwrap();
//!
//! ctx.set_input_u64("a", 3).unwrap();
//! ctx.set_input_u64("b", 4).unwrap();
//! ctx.eval(0).unwrap();
//! assert_eq!(ctx.output_value("sum").unwrap().to_u64(), Some(7));
//! ```
//!
//! # Modules
//!
//! - `context`: node factories, ports, clocks and instances
//! - `cond`: conditional branches and their lowering into selects
//! - `sim`: `tick_next`/`tick`/`eval`
//! - `compile`: structural checks, proxy elision, dead code elimination
//! - `proxy`: bit-range bookkeeping for proxy nodes
//! - `alu`: operator set and evaluation
//! - `cdomain`: clock domains and edge detection
//! - `view`: serializable node views, dumps and fingerprints

#![warn(missing_docs)]

pub mod alu;
pub mod arena;
pub mod cdomain;
pub mod compile;
mod cond;
pub mod context;
pub mod error;
mod format;
pub mod ids;
pub mod node;
pub mod proxy;
mod sim;
pub mod view;

pub use alu::AluOp;
pub use arena::{Arena, ArenaId};
pub use cdomain::{ClockDomain, ClockEvent, Edge};
pub use compile::{CompileStats, Compiler};
pub use context::{Context, DEFAULT_CLOCK, DEFAULT_RESET};
pub use error::{IrError, IrResult};
pub use ids::{ClockDomainId, NodeId};
pub use node::{Instance, MemPortState, MemoryState, Node, NodeKind, Udf, UdfState};
pub use proxy::{ProxyRange, RangeList};
pub use view::{ContextStats, NodeView};
