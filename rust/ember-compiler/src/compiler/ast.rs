//! Bound expression tree consumed from the front end.
//!
//! Every node carries its resolved operator kind, a type-hint mask from type
//! inference, and the access intent the surrounding context requires. The
//! builder helpers propagate access the way semantic binding does: writing
//! to `$a[k]` makes `$a` an ensure-array access, `unset($o->p)` reads `$o`
//! quietly, and so on.

use crate::compiler::carrier::CarrierType;
use serde::{Deserialize, Serialize};
use std::ops::BitOr;
use std::sync::atomic::{AtomicU32, Ordering};

// ── Source positions ────────────────────────────────────────────────

/// Source location of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of the start in the source
    pub start: usize,
    /// Byte offset of the end (exclusive) in the source
    pub end: usize,
    /// 1-based line number
    pub line: usize,
    /// 1-based column number
    pub col: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, col: usize) -> Self {
        Self { start, end, line, col }
    }

    pub fn dummy() -> Self {
        Self::default()
    }
}

/// Identity of a node within a compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(pub u32);

static NEXT_EXPR_ID: AtomicU32 = AtomicU32::new(1);

impl ExprId {
    pub fn fresh() -> Self {
        ExprId(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

// ── Type hints ──────────────────────────────────────────────────────

/// Approximate static type of an expression: the set of PHP types it may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeMask(pub u32);

impl TypeMask {
    pub const NULL: TypeMask = TypeMask(1);
    pub const BOOL: TypeMask = TypeMask(1 << 1);
    pub const INT: TypeMask = TypeMask(1 << 2);
    pub const FLOAT: TypeMask = TypeMask(1 << 3);
    pub const STRING: TypeMask = TypeMask(1 << 4);
    pub const ARRAY: TypeMask = TypeMask(1 << 5);
    pub const OBJECT: TypeMask = TypeMask(1 << 6);
    /// No information.
    pub const ANY: TypeMask = TypeMask(0x7f);

    pub fn contains(self, other: TypeMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_any(self) -> bool {
        self == TypeMask::ANY || self.0 == 0
    }

    pub fn is_long_only(self) -> bool {
        self == TypeMask::INT
    }

    pub fn is_double_only(self) -> bool {
        self == TypeMask::FLOAT
    }

    /// Int, float, or both; never null.
    pub fn is_number_only(self) -> bool {
        self.0 != 0 && (self.0 & !(TypeMask::INT.0 | TypeMask::FLOAT.0)) == 0
    }

    pub fn is_bool_only(self) -> bool {
        self == TypeMask::BOOL
    }

    pub fn is_string_only(self) -> bool {
        self == TypeMask::STRING
    }

    pub fn is_array_only(self) -> bool {
        self == TypeMask::ARRAY
    }
}

impl Default for TypeMask {
    fn default() -> Self {
        TypeMask::ANY
    }
}

impl BitOr for TypeMask {
    type Output = TypeMask;
    fn bitor(self, rhs: TypeMask) -> TypeMask {
        TypeMask(self.0 | rhs.0)
    }
}

// ── Access intent ───────────────────────────────────────────────────

/// What the context does with an expression's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Access {
    flags: u16,
    /// Carrier the consumer wants the value converted to, when known.
    pub target: Option<CarrierType>,
}

impl Access {
    pub const NONE: u16 = 0;
    pub const READ: u16 = 1;
    pub const WRITE: u16 = 1 << 1;
    pub const READ_REF: u16 = 1 << 2;
    pub const WRITE_REF: u16 = 1 << 3;
    pub const UNSET: u16 = 1 << 4;
    pub const ENSURE_ARRAY: u16 = 1 << 5;
    pub const ENSURE_OBJECT: u16 = 1 << 6;
    /// Substitute defaults instead of warning; used by isset, empty and `??`.
    pub const QUIET: u16 = 1 << 7;
    pub const ISSET: u16 = 1 << 8;
    /// The value is being copied into another location.
    pub const READ_COPY: u16 = 1 << 9;

    pub fn new(flags: u16) -> Self {
        Access { flags, target: None }
    }

    pub fn none() -> Self {
        Access::new(Access::NONE)
    }

    pub fn read() -> Self {
        Access::new(Access::READ)
    }

    pub fn write() -> Self {
        Access::new(Access::WRITE)
    }

    pub fn with_target(mut self, target: CarrierType) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with(mut self, flags: u16) -> Self {
        self.flags |= flags;
        self
    }

    pub fn flags(self) -> u16 {
        self.flags
    }

    fn has(self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    pub fn is_none(self) -> bool {
        self.flags == Access::NONE
    }

    /// Any kind of read, including ensure and read-ref.
    pub fn is_read(self) -> bool {
        self.has(Access::READ | Access::READ_REF | Access::ENSURE_ARRAY | Access::ENSURE_OBJECT | Access::ISSET)
    }

    pub fn is_write(self) -> bool {
        self.has(Access::WRITE)
    }

    pub fn is_read_ref(self) -> bool {
        self.has(Access::READ_REF)
    }

    pub fn is_write_ref(self) -> bool {
        self.has(Access::WRITE_REF)
    }

    pub fn is_unset(self) -> bool {
        self.has(Access::UNSET)
    }

    pub fn ensure_array(self) -> bool {
        self.has(Access::ENSURE_ARRAY)
    }

    pub fn ensure_object(self) -> bool {
        self.has(Access::ENSURE_OBJECT)
    }

    pub fn is_quiet(self) -> bool {
        self.has(Access::QUIET | Access::ISSET)
    }

    pub fn is_isset(self) -> bool {
        self.has(Access::ISSET)
    }

    pub fn is_read_copy(self) -> bool {
        self.has(Access::READ_COPY)
    }

    /// Access required on the array operand of `array[key]` with this access.
    fn for_array_operand(self) -> Access {
        if self.has(Access::WRITE | Access::WRITE_REF | Access::READ_REF | Access::ENSURE_ARRAY | Access::ENSURE_OBJECT) {
            Access::new(Access::ENSURE_ARRAY)
        } else if self.has(Access::UNSET | Access::QUIET | Access::ISSET) {
            Access::new(Access::READ | Access::QUIET)
        } else {
            Access::read()
        }
    }

    /// Access required on the receiver of `obj->name` with this access.
    fn for_receiver(self) -> Access {
        if self.has(Access::WRITE | Access::WRITE_REF | Access::READ_REF | Access::ENSURE_ARRAY | Access::ENSURE_OBJECT) {
            Access::new(Access::ENSURE_OBJECT)
        } else if self.has(Access::UNSET | Access::QUIET | Access::ISSET) {
            Access::new(Access::READ | Access::QUIET)
        } else {
            Access::read()
        }
    }
}

// ── Operators ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Concat,
    Eq,
    NotEq,
    Identical,
    NotIdentical,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Spaceship,
    And,
    Or,
    Xor,
    Coalesce,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Concat => ".",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Identical => "===",
            BinaryOp::NotIdentical => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::LtEq => "<=",
            BinaryOp::GtEq => ">=",
            BinaryOp::Spaceship => "<=>",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Xor => "xor",
            BinaryOp::Coalesce => "??",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
    Print,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastKind {
    Bool,
    Int,
    Float,
    String,
    Array,
    Object,
    Unset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncDecKind {
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

impl IncDecKind {
    pub fn is_increment(self) -> bool {
        matches!(self, IncDecKind::PreInc | IncDecKind::PostInc)
    }

    pub fn is_postfix(self) -> bool {
        matches!(self, IncDecKind::PostInc | IncDecKind::PostDec)
    }
}

// ── Expressions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Literal {
    pub fn mask(&self) -> TypeMask {
        match self {
            Literal::Null => TypeMask::NULL,
            Literal::Bool(_) => TypeMask::BOOL,
            Literal::Int(_) => TypeMask::INT,
            Literal::Float(_) => TypeMask::FLOAT,
            Literal::String(_) => TypeMask::STRING,
        }
    }
}

/// A name that is either known at compile time or computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Name {
    Static(String),
    Dynamic(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arg {
    pub expr: Expr,
    /// `...$args`
    pub unpack: bool,
}

impl Arg {
    pub fn new(expr: Expr) -> Self {
        Arg { expr, unpack: false }
    }

    pub fn unpacked(expr: Expr) -> Self {
        Arg { expr, unpack: true }
    }
}

/// Call target. A `None` resolution in the front end always lands here;
/// statically resolved callees are out of this core's scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallTarget {
    /// `foo(...)` where `foo` could not be bound at compile time.
    Function(String),
    /// `$f(...)`
    Indirect(Box<Expr>),
    /// `$obj->name(...)`
    Method { instance: Box<Expr>, name: Name },
    /// `Cls::name(...)`
    Static { class: Name, name: Name },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayItem {
    pub key: Option<Expr>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    pub key: Option<Expr>,
    pub target: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    Variable(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Cast {
        kind: CastKind,
        operand: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    AssignRef {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    CompoundAssign {
        op: BinaryOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    IncDec {
        kind: IncDecKind,
        target: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        /// `None` for the short form `c ?: b`.
        if_true: Option<Box<Expr>>,
        if_false: Box<Expr>,
    },
    Concat(Vec<Expr>),
    ArrayLiteral(Vec<ArrayItem>),
    /// `$a[key]`; `None` key is the append form `$a[]`.
    ArrayItem {
        array: Box<Expr>,
        index: Option<Box<Expr>>,
    },
    Field {
        instance: Box<Expr>,
        name: Name,
    },
    List(Vec<Option<ListItem>>),
    Isset(Vec<Expr>),
    Empty(Box<Expr>),
    Constant {
        name: String,
        /// Value known at compile time.
        value: Option<Literal>,
        /// Unqualified name to try when a namespaced one is undefined.
        fallback: Option<String>,
    },
    Call {
        target: CallTarget,
        args: Vec<Arg>,
        type_args: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
    pub mask: TypeMask,
    pub access: Access,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr {
            id: ExprId::fresh(),
            kind,
            mask: TypeMask::ANY,
            access: Access::read(),
            span: Span::dummy(),
        }
    }

    pub fn with_mask(mut self, mask: TypeMask) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Sets the access intent and pushes the implied access down to the
    /// array operand or receiver of item and field nodes.
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        match &mut self.kind {
            ExprKind::ArrayItem { array, .. } => {
                let inner = std::mem::replace(array.as_mut(), Expr::null());
                **array = inner.with_access(access.for_array_operand());
            }
            ExprKind::Field { instance, .. } => {
                let inner = std::mem::replace(instance.as_mut(), Expr::null());
                **instance = inner.with_access(access.for_receiver());
            }
            ExprKind::List(items) => {
                for item in items.iter_mut().flatten() {
                    let target = std::mem::replace(&mut item.target, Expr::null());
                    item.target = target.with_access(Access::write());
                }
            }
            _ => {}
        }
        self
    }

    // ── Leaves ──────────────────────────────────────────────────────

    pub fn literal(lit: Literal) -> Self {
        let mask = lit.mask();
        Expr::new(ExprKind::Literal(lit)).with_mask(mask)
    }

    pub fn null() -> Self {
        Expr::literal(Literal::Null)
    }

    pub fn bool(b: bool) -> Self {
        Expr::literal(Literal::Bool(b))
    }

    pub fn int(n: i64) -> Self {
        Expr::literal(Literal::Int(n))
    }

    pub fn float(f: f64) -> Self {
        Expr::literal(Literal::Float(f))
    }

    pub fn string(s: &str) -> Self {
        Expr::literal(Literal::String(s.to_string()))
    }

    pub fn var(name: &str) -> Self {
        Expr::new(ExprKind::Variable(name.to_string()))
    }

    pub fn constant(name: &str) -> Self {
        Expr::new(ExprKind::Constant {
            name: name.to_string(),
            value: None,
            fallback: None,
        })
    }

    // ── Operators ───────────────────────────────────────────────────

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        let (left, right) = match op {
            BinaryOp::Coalesce => (left.with_access(Access::new(Access::READ | Access::QUIET)), right),
            _ => (left, right),
        };
        Expr::new(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::new(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    pub fn cast(kind: CastKind, operand: Expr) -> Self {
        Expr::new(ExprKind::Cast {
            kind,
            operand: Box::new(operand),
        })
    }

    pub fn concat(parts: Vec<Expr>) -> Self {
        Expr::new(ExprKind::Concat(parts)).with_mask(TypeMask::STRING)
    }

    pub fn conditional(condition: Expr, if_true: Option<Expr>, if_false: Expr) -> Self {
        Expr::new(ExprKind::Conditional {
            condition: Box::new(condition),
            if_true: if_true.map(Box::new),
            if_false: Box::new(if_false),
        })
    }

    // ── Places and assignment ───────────────────────────────────────

    pub fn item(array: Expr, index: Option<Expr>) -> Self {
        Expr::new(ExprKind::ArrayItem {
            array: Box::new(array),
            index: index.map(Box::new),
        })
        .with_access(Access::read())
    }

    pub fn field(instance: Expr, name: &str) -> Self {
        Expr::new(ExprKind::Field {
            instance: Box::new(instance),
            name: Name::Static(name.to_string()),
        })
        .with_access(Access::read())
    }

    pub fn list(items: Vec<Option<ListItem>>) -> Self {
        Expr::new(ExprKind::List(items))
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        let value = match value.kind {
            ExprKind::Variable(_) | ExprKind::ArrayItem { .. } | ExprKind::Field { .. } => {
                let access = value.access.with(Access::READ_COPY);
                value.with_access(access)
            }
            _ => value,
        };
        Expr::new(ExprKind::Assign {
            target: Box::new(target.with_access(Access::write())),
            value: Box::new(value),
        })
    }

    pub fn assign_ref(target: Expr, value: Expr) -> Self {
        Expr::new(ExprKind::AssignRef {
            target: Box::new(target.with_access(Access::new(Access::WRITE_REF))),
            value: Box::new(value.with_access(Access::new(Access::READ_REF))),
        })
    }

    pub fn compound(op: BinaryOp, target: Expr, value: Expr) -> Self {
        let access = Access::new(Access::READ | Access::WRITE);
        Expr::new(ExprKind::CompoundAssign {
            op,
            target: Box::new(target.with_access(access)),
            value: Box::new(value),
        })
    }

    pub fn inc_dec(kind: IncDecKind, target: Expr) -> Self {
        let access = Access::new(Access::READ | Access::WRITE);
        Expr::new(ExprKind::IncDec {
            kind,
            target: Box::new(target.with_access(access)),
        })
    }

    pub fn isset(vars: Vec<Expr>) -> Self {
        let vars = vars
            .into_iter()
            .map(|v| v.with_access(Access::new(Access::READ | Access::ISSET)))
            .collect();
        Expr::new(ExprKind::Isset(vars)).with_mask(TypeMask::BOOL)
    }

    pub fn empty(operand: Expr) -> Self {
        let operand = operand.with_access(Access::new(Access::READ | Access::QUIET));
        Expr::new(ExprKind::Empty(Box::new(operand))).with_mask(TypeMask::BOOL)
    }

    // ── Calls ───────────────────────────────────────────────────────

    pub fn call(name: &str, args: Vec<Arg>) -> Self {
        Expr::new(ExprKind::Call {
            target: CallTarget::Function(name.to_string()),
            args,
            type_args: Vec::new(),
        })
    }

    pub fn call_indirect(callee: Expr, args: Vec<Arg>) -> Self {
        Expr::new(ExprKind::Call {
            target: CallTarget::Indirect(Box::new(callee)),
            args,
            type_args: Vec::new(),
        })
    }

    pub fn method_call(instance: Expr, name: Name, args: Vec<Arg>) -> Self {
        Expr::new(ExprKind::Call {
            target: CallTarget::Method {
                instance: Box::new(instance),
                name,
            },
            args,
            type_args: Vec::new(),
        })
    }

    pub fn static_call(class: Name, name: Name, args: Vec<Arg>) -> Self {
        Expr::new(ExprKind::Call {
            target: CallTarget::Static { class, name },
            args,
            type_args: Vec::new(),
        })
    }

    /// Discards the value; used for expression statements.
    pub fn discarded(self) -> Self {
        let mut e = self;
        e.access = Access::none();
        e
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(self.kind, ExprKind::Literal(Literal::Null))
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match &self.kind {
            ExprKind::Literal(lit) => Some(lit),
            ExprKind::Constant { value: Some(lit), .. } => Some(lit),
            _ => None,
        }
    }
}

// ── Statements and functions ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Expr(Expr),
    Echo(Vec<Expr>),
    Return(Option<Expr>),
    Unset(Vec<Expr>),
}

impl Stmt {
    pub fn expr(e: Expr) -> Self {
        Stmt::Expr(e.discarded())
    }

    pub fn unset(places: Vec<Expr>) -> Self {
        Stmt::Unset(
            places
                .into_iter()
                .map(|p| p.with_access(Access::new(Access::UNSET)))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDecl {
    pub name: String,
    pub carrier: CarrierType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    /// Parameters come first in the local table.
    pub params: Vec<LocalDecl>,
    pub locals: Vec<LocalDecl>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

impl FunctionDecl {
    pub fn new(name: &str) -> Self {
        FunctionDecl {
            name: name.to_string(),
            params: Vec::new(),
            locals: Vec::new(),
            body: Vec::new(),
            span: Span::dummy(),
        }
    }

    pub fn param(mut self, name: &str, carrier: CarrierType) -> Self {
        self.params.push(LocalDecl {
            name: name.to_string(),
            carrier,
        });
        self
    }

    pub fn local(mut self, name: &str, carrier: CarrierType) -> Self {
        self.locals.push(LocalDecl {
            name: name.to_string(),
            carrier,
        });
        self
    }

    pub fn stmt(mut self, stmt: Stmt) -> Self {
        self.body.push(stmt);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_to_item_ensures_array_operand() {
        let e = Expr::assign(Expr::item(Expr::item(Expr::var("a"), Some(Expr::int(1))), Some(Expr::int(2))), Expr::int(3));
        let ExprKind::Assign { target, .. } = &e.kind else {
            panic!("expected assignment");
        };
        assert!(target.access.is_write());
        let ExprKind::ArrayItem { array, .. } = &target.kind else {
            panic!("expected item");
        };
        assert!(array.access.ensure_array());
        let ExprKind::ArrayItem { array: inner, .. } = &array.kind else {
            panic!("expected nested item");
        };
        assert!(inner.access.ensure_array());
    }

    #[test]
    fn test_unset_reads_operand_quietly() {
        let Stmt::Unset(places) = Stmt::unset(vec![Expr::item(Expr::var("a"), Some(Expr::int(0)))]) else {
            panic!("expected unset");
        };
        let ExprKind::ArrayItem { array, .. } = &places[0].kind else {
            panic!("expected item");
        };
        assert!(array.access.is_quiet());
        assert!(!array.access.ensure_array());
    }

    #[test]
    fn test_mask_queries() {
        assert!(TypeMask::INT.is_long_only());
        assert!((TypeMask::INT | TypeMask::FLOAT).is_number_only());
        assert!(!(TypeMask::INT | TypeMask::NULL).is_number_only());
        assert!(TypeMask::ANY.is_any());
    }
}
