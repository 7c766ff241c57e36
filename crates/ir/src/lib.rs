pub mod area;
pub mod builder;
pub mod cfg;
pub mod expr;
pub mod function;
pub mod inst;
pub mod isa;
pub mod reg;
pub mod types;
pub mod verify;

pub use area::{Area, AreaId, SubArea};
pub use builder::FunctionBuilder;
pub use cfg::Cfg;
pub use expr::{Expr, Lit, MachOp};
pub use function::{BlockData, BlockId, Function, StackInfo};
pub use inst::{Last, Middle, SlotNode};
pub use isa::Isa;
pub use reg::{GlobalReg, LocalReg, Reg};
pub use types::{Type, TypeKind, Width};
pub use verify::{verify, VerifyError};
