//! Instruction encoding of the nonlinear code stream.
//!
//! An equation arrives as a postfix program: a sequence of `(opcode, field)` pairs where
//! the field is a 1-based address into the constant pool, the variable array or the
//! function table, depending on the opcode. Both numberings are fixed by the upstream
//! modeling system, so they are mirrored here as closed enums.

use std::fmt;

use crate::errors::DecodeError;

/// Operation tag of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    NoOp = 0,
    PushV = 1,
    PushI = 2,
    Store = 3,
    Add = 4,
    AddV = 5,
    AddI = 6,
    Sub = 7,
    SubV = 8,
    SubI = 9,
    Mul = 10,
    MulV = 11,
    MulI = 12,
    Div = 13,
    DivV = 14,
    DivI = 15,
    UMin = 16,
    UMinV = 17,
    Header = 18,
    End = 19,
    CallArg1 = 20,
    CallArg2 = 21,
    CallArgN = 22,
    FuncArgN = 23,
    MulIAdd = 24,
    PushZero = 25,
    Chk = 26,
    AddO = 27,
    PushO = 28,
    Invoc = 29,
    StackIn = 30,
}

impl OpCode {
    const ALL: [OpCode; 31] = [
        OpCode::NoOp,
        OpCode::PushV,
        OpCode::PushI,
        OpCode::Store,
        OpCode::Add,
        OpCode::AddV,
        OpCode::AddI,
        OpCode::Sub,
        OpCode::SubV,
        OpCode::SubI,
        OpCode::Mul,
        OpCode::MulV,
        OpCode::MulI,
        OpCode::Div,
        OpCode::DivV,
        OpCode::DivI,
        OpCode::UMin,
        OpCode::UMinV,
        OpCode::Header,
        OpCode::End,
        OpCode::CallArg1,
        OpCode::CallArg2,
        OpCode::CallArgN,
        OpCode::FuncArgN,
        OpCode::MulIAdd,
        OpCode::PushZero,
        OpCode::Chk,
        OpCode::AddO,
        OpCode::PushO,
        OpCode::Invoc,
        OpCode::StackIn,
    ];

    /// Name used by the upstream system, for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::NoOp => "nlNoOp",
            OpCode::PushV => "nlPushV",
            OpCode::PushI => "nlPushI",
            OpCode::Store => "nlStore",
            OpCode::Add => "nlAdd",
            OpCode::AddV => "nlAddV",
            OpCode::AddI => "nlAddI",
            OpCode::Sub => "nlSub",
            OpCode::SubV => "nlSubV",
            OpCode::SubI => "nlSubI",
            OpCode::Mul => "nlMul",
            OpCode::MulV => "nlMulV",
            OpCode::MulI => "nlMulI",
            OpCode::Div => "nlDiv",
            OpCode::DivV => "nlDivV",
            OpCode::DivI => "nlDivI",
            OpCode::UMin => "nlUMin",
            OpCode::UMinV => "nlUMinV",
            OpCode::Header => "nlHeader",
            OpCode::End => "nlEnd",
            OpCode::CallArg1 => "nlCallArg1",
            OpCode::CallArg2 => "nlCallArg2",
            OpCode::CallArgN => "nlCallArgN",
            OpCode::FuncArgN => "nlFuncArgN",
            OpCode::MulIAdd => "nlMulIAdd",
            OpCode::PushZero => "nlPushZero",
            OpCode::Chk => "nlChk",
            OpCode::AddO => "nlAddO",
            OpCode::PushO => "nlPushO",
            OpCode::Invoc => "nlInvoc",
            OpCode::StackIn => "nlStackIn",
        }
    }
}

impl TryFrom<i32> for OpCode {
    type Error = DecodeError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| OpCode::ALL.get(idx).copied())
            .ok_or(DecodeError::UnsupportedOpcode(code.to_string()))
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

macro_rules! func_codes {
    ($($variant:ident = $code:literal => $name:literal,)*) => {
        /// Identifier of a function in the upstream function table.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum FuncCode {
            $($variant = $code,)*
        }

        impl FuncCode {
            /// Name used by the upstream system, for diagnostics.
            pub fn name(self) -> &'static str {
                match self {
                    $(FuncCode::$variant => $name,)*
                }
            }

            /// Looks up a function identifier; `None` for codes newer than this table.
            pub fn from_code(code: i32) -> Option<Self> {
                match code {
                    $($code => Some(FuncCode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

func_codes! {
    MapVal = 0 => "mapval",
    Ceil = 1 => "ceil",
    Floor = 2 => "floor",
    Round = 3 => "round",
    Mod = 4 => "mod",
    Trunc = 5 => "trunc",
    Sign = 6 => "sign",
    Min = 7 => "min",
    Max = 8 => "max",
    Sqr = 9 => "sqr",
    Exp = 10 => "exp",
    Log = 11 => "log",
    Log10 = 12 => "log10",
    Sqrt = 13 => "sqrt",
    Abs = 14 => "abs",
    Cos = 15 => "cos",
    Sin = 16 => "sin",
    ArcTan = 17 => "arctan",
    Errf = 18 => "errf",
    Dunfm = 19 => "dunfm",
    Dnorm = 20 => "dnorm",
    Power = 21 => "power",
    JDate = 22 => "jdate",
    JTime = 23 => "jtime",
    JStart = 24 => "jstart",
    JNow = 25 => "jnow",
    Error = 26 => "error",
    GYear = 27 => "gyear",
    GMonth = 28 => "gmonth",
    GDay = 29 => "gday",
    GDow = 30 => "gdow",
    GLeap = 31 => "gleap",
    GHour = 32 => "ghour",
    GMinute = 33 => "gminute",
    GSecond = 34 => "gsecond",
    CurSeed = 35 => "curseed",
    TimeSt = 36 => "timest",
    TimeCo = 37 => "timeco",
    TimeEx = 38 => "timeex",
    TimeCl = 39 => "timecl",
    Frac = 40 => "frac",
    ErrorL = 41 => "errorl",
    HeapLimit = 42 => "heaplimit",
    Fact = 43 => "fact",
    Unfmi = 44 => "unfmi",
    Pi = 45 => "pi",
    NcpF = 46 => "ncpf",
    NcpCm = 47 => "ncpcm",
    Entropy = 48 => "entropy",
    Sigmoid = 49 => "sigmoid",
    Log2 = 50 => "log2",
    BoolNot = 51 => "bool_not",
    BoolAnd = 52 => "bool_and",
    BoolOr = 53 => "bool_or",
    BoolXor = 54 => "bool_xor",
    BoolImp = 55 => "bool_imp",
    BoolEqv = 56 => "bool_eqv",
    RelOpEq = 57 => "rel_eq",
    RelOpGt = 58 => "rel_gt",
    RelOpGe = 59 => "rel_ge",
    RelOpLt = 60 => "rel_lt",
    RelOpLe = 61 => "rel_le",
    RelOpNe = 62 => "rel_ne",
    IfThen = 63 => "ifthen",
    RPower = 64 => "rpower",
    EDist = 65 => "edist",
    Div = 66 => "div",
    Div0 = 67 => "div0",
    SlLog10 = 68 => "sllog10",
    SqLog10 = 69 => "sqlog10",
    SlExp = 70 => "slexp",
    SqExp = 71 => "sqexp",
    SlRec = 72 => "slrec",
    SqRec = 73 => "sqrec",
    CvPower = 74 => "cvpower",
    VcPower = 75 => "vcpower",
    CEntropy = 76 => "centropy",
    GMillisec = 77 => "gmillisec",
    MaxError = 78 => "maxerror",
    TimeEl = 79 => "timeel",
    Gamma = 80 => "gamma",
    LogGamma = 81 => "loggamma",
    Beta = 82 => "beta",
    LogBeta = 83 => "logbeta",
    GammaReg = 84 => "gammareg",
    BetaReg = 85 => "betareg",
    Sinh = 86 => "sinh",
    Cosh = 87 => "cosh",
    Tanh = 88 => "tanh",
    MathLastRc = 89 => "mathlastrc",
    MathLastEc = 90 => "mathlastec",
    MathOval = 91 => "mathoval",
    SignPower = 92 => "signpower",
    Handle = 93 => "handle",
    NcpVuSin = 94 => "ncpvusin",
    NcpVuPow = 95 => "ncpvupow",
    Binomial = 96 => "binomial",
    ReHandle = 97 => "rehandle",
    GamsVer = 98 => "gamsver",
    DelHandle = 99 => "delhandle",
    Tan = 100 => "tan",
    ArcCos = 101 => "arccos",
    ArcSin = 102 => "arcsin",
    ArcTan2 = 103 => "arctan2",
    Sleep = 104 => "sleep",
    HeapF = 105 => "heapf",
    CoHandle = 106 => "cohandle",
    GamsRel = 107 => "gamsrel",
    Poly = 108 => "poly",
}

impl fmt::Display for FuncCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One `(opcode, field)` pair of the stream. `field` keeps the upstream 1-based bias;
/// the decoder removes it at the point of use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: OpCode,
    pub field: i32,
}

impl Instruction {
    pub fn new(opcode: OpCode, field: i32) -> Self {
        Self { opcode, field }
    }

    /// Builds an instruction from the raw integers handed out by the model object.
    pub fn from_raw(opcode: i32, field: i32) -> Result<Self, DecodeError> {
        Ok(Self::new(OpCode::try_from(opcode)?, field))
    }

    /// Zips the parallel opcode/field arrays of one equation into instructions.
    pub fn from_raw_arrays(opcodes: &[i32], fields: &[i32]) -> Result<Vec<Self>, DecodeError> {
        if opcodes.len() != fields.len() {
            return Err(DecodeError::InvalidOperandShape(format!(
                "{} opcodes but {} fields",
                opcodes.len(),
                fields.len()
            )));
        }
        opcodes
            .iter()
            .zip(fields)
            .map(|(&op, &field)| Self::from_raw(op, field))
            .collect()
    }

    // Constructors below take 0-based addresses and apply the upstream bias.
    // They panic if the biased address does not fit the i32 field.

    pub fn push_var(index: usize) -> Self {
        Self::addressed(OpCode::PushV, index)
    }

    pub fn push_const(index: usize) -> Self {
        Self::addressed(OpCode::PushI, index)
    }

    pub fn push_zero() -> Self {
        Self::new(OpCode::PushZero, 0)
    }

    pub fn add() -> Self {
        Self::new(OpCode::Add, 0)
    }

    pub fn add_var(index: usize) -> Self {
        Self::addressed(OpCode::AddV, index)
    }

    pub fn add_const(index: usize) -> Self {
        Self::addressed(OpCode::AddI, index)
    }

    pub fn sub() -> Self {
        Self::new(OpCode::Sub, 0)
    }

    pub fn sub_var(index: usize) -> Self {
        Self::addressed(OpCode::SubV, index)
    }

    pub fn sub_const(index: usize) -> Self {
        Self::addressed(OpCode::SubI, index)
    }

    pub fn mul() -> Self {
        Self::new(OpCode::Mul, 0)
    }

    pub fn mul_var(index: usize) -> Self {
        Self::addressed(OpCode::MulV, index)
    }

    pub fn mul_const(index: usize) -> Self {
        Self::addressed(OpCode::MulI, index)
    }

    pub fn mul_const_add(index: usize) -> Self {
        Self::addressed(OpCode::MulIAdd, index)
    }

    pub fn div() -> Self {
        Self::new(OpCode::Div, 0)
    }

    pub fn div_var(index: usize) -> Self {
        Self::addressed(OpCode::DivV, index)
    }

    pub fn div_const(index: usize) -> Self {
        Self::addressed(OpCode::DivI, index)
    }

    pub fn negate() -> Self {
        Self::new(OpCode::UMin, 0)
    }

    pub fn negate_var(index: usize) -> Self {
        Self::addressed(OpCode::UMinV, index)
    }

    /// Declares the argument count of the next `CallArgN`.
    ///
    /// # Panics
    ///
    /// Panics if `nargs` does not fit the `i32` field.
    pub fn arg_count(nargs: usize) -> Self {
        let field = i32::try_from(nargs).expect("argument count exceeds the i32 field range");
        Self::new(OpCode::FuncArgN, field)
    }

    pub fn call1(func: FuncCode) -> Self {
        Self::new(OpCode::CallArg1, func as i32)
    }

    pub fn call2(func: FuncCode) -> Self {
        Self::new(OpCode::CallArg2, func as i32)
    }

    pub fn call_n(func: FuncCode) -> Self {
        Self::new(OpCode::CallArgN, func as i32)
    }

    fn addressed(opcode: OpCode, index: usize) -> Self {
        let field = i32::try_from(index)
            .ok()
            .and_then(|i| i.checked_add(1))
            .expect("instruction address exceeds the i32 field range");
        Self::new(opcode, field)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.opcode, self.field)
    }
}
