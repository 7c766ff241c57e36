//! Expression trees.

use core::fmt;

use crate::{
    area::Area,
    isa::Isa,
    reg::Reg,
    types::{Type, Width},
};

/// A literal operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lit {
    Int(i64, Width),
    /// Placeholder for the frame's high-water mark; replaced with a
    /// concrete [`Lit::Int`] once stack layout has run.
    HighWaterMark(Width),
}

impl Lit {
    pub fn width(self) -> Width {
        match self {
            Self::Int(_, w) | Self::HighWaterMark(w) => w,
        }
    }
}

impl fmt::Display for Lit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v, w) => write!(f, "{v}::{w}"),
            Self::HighWaterMark(w) => write!(f, "<highSp>::{w}"),
        }
    }
}

/// Machine operations, parameterized by operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachOp {
    Add(Width),
    Sub(Width),
    Mul(Width),
    And(Width),
    Or(Width),
    Xor(Width),
    Eq(Width),
    Ne(Width),
    Lt(Width),
    Le(Width),
}

impl MachOp {
    /// Comparisons produce a word-like value of the operand width; the
    /// arithmetic ops keep it.
    pub fn result_width(self) -> Width {
        match self {
            Self::Add(w)
            | Self::Sub(w)
            | Self::Mul(w)
            | Self::And(w)
            | Self::Or(w)
            | Self::Xor(w)
            | Self::Eq(w)
            | Self::Ne(w)
            | Self::Lt(w)
            | Self::Le(w) => w,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add(_) => "+",
            Self::Sub(_) => "-",
            Self::Mul(_) => "*",
            Self::And(_) => "&",
            Self::Or(_) => "|",
            Self::Xor(_) => "^",
            Self::Eq(_) => "==",
            Self::Ne(_) => "!=",
            Self::Lt(_) => "<",
            Self::Le(_) => "<=",
        }
    }
}

/// An expression tree.
///
/// [`Expr::StackSlot`] addresses a byte within a symbolic stack area; the
/// layout pass replaces every occurrence with stack-pointer arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Lit(Lit),
    Reg(Reg),
    Load(Box<Expr>, Type),
    Op(MachOp, Vec<Expr>),
    StackSlot(Area, i32),
}

impl Expr {
    pub fn int(value: i64, width: Width) -> Expr {
        Expr::Lit(Lit::Int(value, width))
    }

    pub fn reg(reg: impl Into<Reg>) -> Expr {
        Expr::Reg(reg.into())
    }

    pub fn load(addr: Expr, ty: Type) -> Expr {
        Expr::Load(Box::new(addr), ty)
    }

    pub fn op(op: MachOp, args: Vec<Expr>) -> Expr {
        Expr::Op(op, args)
    }

    pub fn ty(&self, isa: &Isa) -> Type {
        match self {
            Expr::Lit(l) => Type::int(l.width()),
            Expr::Reg(r) => r.ty(isa),
            Expr::Load(_, ty) => *ty,
            Expr::Op(op, _) => Type::int(op.result_width()),
            Expr::StackSlot(..) => isa.word_ty(),
        }
    }

    /// Visit this expression and every sub-expression, parents first.
    pub fn for_each(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Load(addr, _) => addr.for_each(f),
            Expr::Op(_, args) => {
                for a in args {
                    a.for_each(f);
                }
            }
            Expr::Lit(_) | Expr::Reg(_) | Expr::StackSlot(..) => {}
        }
    }

    /// Rebuild the tree bottom-up, applying `f` to every node after its
    /// children have been rewritten.
    pub fn map_deep(self, f: &mut impl FnMut(Expr) -> Expr) -> Expr {
        let node = match self {
            Expr::Load(addr, ty) => Expr::Load(Box::new(addr.map_deep(f)), ty),
            Expr::Op(op, args) => {
                Expr::Op(op, args.into_iter().map(|a| a.map_deep(f)).collect())
            }
            leaf => leaf,
        };
        f(node)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Lit(l) => write!(f, "{l}"),
            Expr::Reg(r) => write!(f, "{r}"),
            Expr::Load(addr, ty) => write!(f, "{ty}[{addr}]"),
            Expr::Op(op, args) => {
                if let [lhs, rhs] = args.as_slice() {
                    write!(f, "({lhs} {} {rhs})", op.as_str())
                } else {
                    write!(f, "{}(", op.as_str())?;
                    for (i, a) in args.iter().enumerate() {
                        if i != 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{a}")?;
                    }
                    write!(f, ")")
                }
            }
            Expr::StackSlot(area, off) => write!(f, "slot[{area} + {off}]"),
        }
    }
}
