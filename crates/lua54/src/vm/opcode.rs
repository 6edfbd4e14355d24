//! Opcode set (spec §6.3).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Move,
    LoadK,
    LoadI,
    LoadBool,
    LoadNil,
    GetGlobal,
    SetGlobal,
    GetUpval,
    SetUpval,
    GetTable,
    SetTable,
    SelfOp,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    IDiv,
    Band,
    Bor,
    Bxor,
    Shl,
    Shr,
    Unm,
    Bnot,
    Not,
    Len,
    Concat,
    Eq,
    Lt,
    Le,
    Test,
    TestSet,
    Jmp,
    Call,
    TailCall,
    Return,
    ForPrep,
    ForLoop,
    TForCall,
    TForLoop,
    Closure,
    Close,
    Vararg,
    NewTable,
    SetList,
}

impl OpCode {
    pub const COUNT: usize = 47;

    pub fn from_u8(v: u8) -> Option<OpCode> {
        use OpCode::*;
        const TABLE: [OpCode; OpCode::COUNT] = [
            Move, LoadK, LoadI, LoadBool, LoadNil, GetGlobal, SetGlobal, GetUpval, SetUpval,
            GetTable, SetTable, SelfOp, Add, Sub, Mul, Div, Mod, Pow, IDiv, Band, Bor, Bxor, Shl,
            Shr, Unm, Bnot, Not, Len, Concat, Eq, Lt, Le, Test, TestSet, Jmp, Call, TailCall,
            Return, ForPrep, ForLoop, TForCall, TForLoop, Closure, Close, Vararg, NewTable,
            SetList,
        ];
        TABLE.get(v as usize).copied()
    }

    pub fn mnemonic(self) -> &'static str {
        use OpCode::*;
        match self {
            Move => "MOVE",
            LoadK => "LOADK",
            LoadI => "LOADI",
            LoadBool => "LOADBOOL",
            LoadNil => "LOADNIL",
            GetGlobal => "GETGLOBAL",
            SetGlobal => "SETGLOBAL",
            GetUpval => "GETUPVAL",
            SetUpval => "SETUPVAL",
            GetTable => "GETTABLE",
            SetTable => "SETTABLE",
            SelfOp => "SELF",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Pow => "POW",
            IDiv => "IDIV",
            Band => "BAND",
            Bor => "BOR",
            Bxor => "BXOR",
            Shl => "SHL",
            Shr => "SHR",
            Unm => "UNM",
            Bnot => "BNOT",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Test => "TEST",
            TestSet => "TESTSET",
            Jmp => "JMP",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            ForPrep => "FORPREP",
            ForLoop => "FORLOOP",
            TForCall => "TFORCALL",
            TForLoop => "TFORLOOP",
            Closure => "CLOSURE",
            Close => "CLOSE",
            Vararg => "VARARG",
            NewTable => "NEWTABLE",
            SetList => "SETLIST",
        }
    }
}
