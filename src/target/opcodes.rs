//! Target bytecode opcodes
//!
//! This module defines every instruction the translator can emit and the VM
//! executes. Opcodes are grouped by category and assigned contiguous ranges
//! so dispatch stays a dense `match` and decoding a single table lookup.
//!
//! Typed arithmetic (`AddInt`, `LtInt`, ...) is only emitted when the
//! translator has proven operand kinds; the verifier rejects a chunk whose
//! kinds do not line up.

use std::fmt;

/// Target bytecode opcode enumeration
///
/// Each opcode is assigned a unique u8 value. Opcodes are organized into
/// logical groups with reserved ranges for future expansion.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // === Stack Operations (0x00-0x0F) ===
    /// No operation
    Nop = 0x00,
    /// Discard top of stack
    Pop = 0x01,
    /// Duplicate top of stack
    Dup = 0x02,
    /// Swap top two stack elements
    Swap = 0x03,
    /// Rotate top 3: [a,b,c] -> [c,a,b]
    Rot3 = 0x04,
    /// Copy second element: [a,b] -> [a,b,a]
    Over = 0x05,
    /// Pop N elements from stack, N is next byte
    PopN = 0x07,
    /// Push a copy of the element N below the top, N is next byte
    Pick = 0x08,
    /// Swap top with the element N below it, N is next byte
    SwapN = 0x09,
    /// Move top down N-1 positions, lifting the rest, N is next byte
    RotN = 0x0A,

    // === Value Creation (0x10-0x1F) ===
    /// Push None
    PushNone = 0x10,
    /// Push Bool(true)
    PushTrue = 0x11,
    /// Push Bool(false)
    PushFalse = 0x12,
    /// Push the null sentinel of the call protocol
    PushNull = 0x13,
    /// Push small integer (-128 to 127), value is next byte
    PushSmallInt = 0x14,
    /// Push constant from pool, index is next 2 bytes
    PushConstant = 0x15,
    /// Push host fallback object for an opaque constant, index is next 2 bytes
    LoadFallback = 0x16,

    // === Variable Operations (0x20-0x2F) ===
    /// Load local slot, raising UnboundLocalError when unbound
    LoadLocal = 0x20,
    /// Store top of stack into local slot
    StoreLocal = 0x21,
    /// Unbind local slot
    DeleteLocal = 0x22,
    /// Load local slot and unbind it, pushing null when already unbound
    TakeLocal = 0x23,
    /// Push the cell object itself
    LoadCell = 0x25,
    /// Load the content of a cell
    LoadDeref = 0x26,
    /// Store into a cell
    StoreDeref = 0x27,
    /// Empty a cell
    DeleteDeref = 0x28,
    /// Load global by name index
    LoadGlobal = 0x29,
    /// Store global by name index
    StoreGlobal = 0x2A,
    /// Delete global by name index
    DeleteGlobal = 0x2B,

    // === Control Flow (0x30-0x3F) ===
    /// Unconditional jump, offset is next 2 bytes (signed)
    Jump = 0x30,
    /// Pop Bool, jump if false
    JumpIfFalse = 0x31,
    /// Pop Bool, jump if true
    JumpIfTrue = 0x32,
    /// Pop, jump if None
    JumpIfNone = 0x33,
    /// Pop, jump if not None
    JumpIfNotNone = 0x34,
    /// Advance iterator on TOS; push next value, or pop iterator and jump
    ForIter = 0x35,
    /// Pop Int key and branch through a jump table, index is next 2 bytes
    JumpTable = 0x36,
    /// Return top of stack to the caller
    Return = 0x37,
    /// Check the kind of TOS, kind is next byte
    Cast = 0x38,
    /// Replace TOS with its truth value
    Truthy = 0x39,
    /// Send TOS into the receiver below it; jump when the receiver returns
    SendOrJump = 0x3A,

    // === Typed Arithmetic (0x40-0x5F) ===
    /// [Int, Int] -> Int
    AddInt = 0x40,
    SubInt = 0x41,
    MulInt = 0x42,
    FloorDivInt = 0x43,
    ModInt = 0x44,
    /// [Int] -> Int
    NegInt = 0x45,
    /// [Float, Float] -> Float
    AddFloat = 0x48,
    SubFloat = 0x49,
    MulFloat = 0x4A,
    TrueDivFloat = 0x4B,
    /// [Float] -> Float
    NegFloat = 0x4C,
    /// [Str, Str] -> Str
    ConcatStr = 0x50,
    /// [Int, Int] -> Bool
    LtInt = 0x51,
    LeInt = 0x52,
    GtInt = 0x53,
    GeInt = 0x54,
    EqInt = 0x55,
    NeInt = 0x56,
    /// [Bool] -> Bool
    Not = 0x57,

    // === Dynamic Dispatch (0x60-0x6F) ===
    /// Binary operator through the dunder protocol, operator is next byte
    BinaryOp = 0x60,
    /// In-place operator with binary fallback, operator is next byte
    InplaceOp = 0x61,
    /// Rich comparison, comparison is next byte
    CompareOp = 0x62,
    /// Unary operator, operator is next byte
    UnaryOp = 0x63,
    /// Identity test, invert flag is next byte
    IsOp = 0x64,
    /// Membership test, invert flag is next byte
    ContainsOp = 0x65,
    /// [container, key] -> [item]
    GetItem = 0x66,
    /// [value, container, key] -> []
    SetItem = 0x67,
    /// [container, key] -> []
    DelItem = 0x68,
    /// [receiver, arg] -> [receiver.name(arg)], name index is next 2 bytes
    InvokeDunder = 0x69,
    /// Replace TOS with its type
    TypeOf = 0x6A,
    /// [exc, type] -> [Bool]
    ExcMatch = 0x6B,

    // === Collections (0x70-0x7F) ===
    BuildTuple = 0x70,
    BuildList = 0x71,
    BuildSet = 0x72,
    /// Build dict from N key/value pairs
    BuildMap = 0x73,
    /// Build dict from N values and a key tuple on top
    BuildConstKeyMap = 0x74,
    /// Build slice from 2 or 3 items, count is next byte
    BuildSlice = 0x75,
    ListAppend = 0x76,
    SetAdd = 0x77,
    MapAdd = 0x78,
    ListExtend = 0x79,
    SetUpdate = 0x7A,
    DictUpdate = 0x7B,
    ListToTuple = 0x7C,
    UnpackSequence = 0x7D,
    /// Unpack with a starred target, low byte before, high byte after
    UnpackEx = 0x7E,
    GetIter = 0x7F,

    // === Functions and Attributes (0x80-0x8F) ===
    /// Build a closure from code and flagged extras, flags are next byte
    MakeFunction = 0x80,
    /// [callable, args...] -> [result], argc is next byte
    Call = 0x81,
    /// [callable, args..., kwnames] -> [result], argc is next byte
    CallKw = 0x82,
    /// [callable, args, kwargs?] -> [result], kwargs flag is next byte
    CallEx = 0x83,
    LoadAttr = 0x84,
    /// [value, obj] -> []
    StoreAttr = 0x85,
    DeleteAttr = 0x86,
    /// [level, fromlist] -> [module]
    ImportName = 0x87,
    /// [module] -> [module, attr]
    ImportFrom = 0x88,

    // === Strings (0x90-0x9F) ===
    /// Format TOS, conversion flags are next byte
    FormatValue = 0x90,
    BuildString = 0x91,
    PrintExpr = 0x92,

    // === Exceptions (0xA0-0xAF) ===
    /// Raise with 0, 1 or 2 operands, count is next byte
    Raise = 0xA0,
    /// Pop exception and raise it again
    Reraise = 0xA1,
    /// Mark TOS as the exception being handled
    EnterHandler = 0xA2,
    /// Restore the previously handled exception
    ExitHandler = 0xA3,

    // === Generators (0xB0-0xBF) ===
    /// Push the generator's resume index
    GenResumeIndex = 0xB0,
    /// Set the resume index, index is next 2 bytes
    GenSetResume = 0xB1,
    GenSaveLocals = 0xB2,
    GenRestoreLocals = 0xB3,
    /// Pop into a generator state slot, slot is next 2 bytes
    GenStoreState = 0xB4,
    /// Push from a generator state slot, slot is next 2 bytes
    GenLoadState = 0xB5,
    /// Suspend, handing TOS to the consumer
    GenYield = 0xB6,
    /// Finish the generator with TOS as its return value
    GenReturn = 0xB7,
    /// Raise an exception injected by throw() or close()
    GenCheckThrow = 0xB8,
    /// Push the value passed to send()
    GenSent = 0xB9,
    GetYieldFromIter = 0xBA,

    // === Debug/Meta (0xFF) ===
    /// Halt execution with error
    Halt = 0xFF,
}

impl Opcode {
    /// Convert byte to opcode, returns None if invalid
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        OPCODE_TABLE.get(byte as usize).copied().flatten()
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Get the number of immediate bytes following this opcode
    #[inline]
    pub fn immediate_size(self) -> usize {
        match self {
            Self::PopN | Self::Pick | Self::SwapN | Self::RotN | Self::PushSmallInt
            | Self::Cast | Self::BinaryOp | Self::InplaceOp | Self::CompareOp
            | Self::UnaryOp | Self::IsOp | Self::ContainsOp | Self::BuildSlice
            | Self::MakeFunction | Self::Call | Self::CallKw | Self::CallEx
            | Self::FormatValue | Self::Raise => 1,

            Self::PushConstant | Self::LoadFallback
            | Self::LoadLocal | Self::StoreLocal | Self::DeleteLocal | Self::TakeLocal
            | Self::LoadCell | Self::LoadDeref | Self::StoreDeref | Self::DeleteDeref
            | Self::LoadGlobal | Self::StoreGlobal | Self::DeleteGlobal
            | Self::Jump | Self::JumpIfFalse | Self::JumpIfTrue | Self::JumpIfNone
            | Self::JumpIfNotNone | Self::ForIter | Self::JumpTable | Self::SendOrJump
            | Self::InvokeDunder
            | Self::BuildTuple | Self::BuildList | Self::BuildSet | Self::BuildMap
            | Self::BuildConstKeyMap | Self::ListAppend | Self::SetAdd | Self::MapAdd
            | Self::ListExtend | Self::SetUpdate | Self::DictUpdate
            | Self::UnpackSequence | Self::UnpackEx
            | Self::LoadAttr | Self::StoreAttr | Self::DeleteAttr
            | Self::ImportName | Self::ImportFrom | Self::BuildString
            | Self::GenSetResume | Self::GenStoreState | Self::GenLoadState => 2,

            _ => 0,
        }
    }

    /// Get the mnemonic name for this opcode
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::Swap => "swap",
            Self::Rot3 => "rot3",
            Self::Over => "over",
            Self::PopN => "popn",
            Self::Pick => "pick",
            Self::SwapN => "swapn",
            Self::RotN => "rotn",
            Self::PushNone => "push_none",
            Self::PushTrue => "push_true",
            Self::PushFalse => "push_false",
            Self::PushNull => "push_null",
            Self::PushSmallInt => "push_small_int",
            Self::PushConstant => "push_const",
            Self::LoadFallback => "load_fallback",
            Self::LoadLocal => "load_local",
            Self::StoreLocal => "store_local",
            Self::DeleteLocal => "delete_local",
            Self::TakeLocal => "take_local",
            Self::LoadCell => "load_cell",
            Self::LoadDeref => "load_deref",
            Self::StoreDeref => "store_deref",
            Self::DeleteDeref => "delete_deref",
            Self::LoadGlobal => "load_global",
            Self::StoreGlobal => "store_global",
            Self::DeleteGlobal => "delete_global",
            Self::Jump => "jump",
            Self::JumpIfFalse => "jump_if_false",
            Self::JumpIfTrue => "jump_if_true",
            Self::JumpIfNone => "jump_if_none",
            Self::JumpIfNotNone => "jump_if_not_none",
            Self::ForIter => "for_iter",
            Self::JumpTable => "jump_table",
            Self::Return => "return",
            Self::Cast => "cast",
            Self::Truthy => "truthy",
            Self::SendOrJump => "send_or_jump",
            Self::AddInt => "add_int",
            Self::SubInt => "sub_int",
            Self::MulInt => "mul_int",
            Self::FloorDivInt => "floor_div_int",
            Self::ModInt => "mod_int",
            Self::NegInt => "neg_int",
            Self::AddFloat => "add_float",
            Self::SubFloat => "sub_float",
            Self::MulFloat => "mul_float",
            Self::TrueDivFloat => "true_div_float",
            Self::NegFloat => "neg_float",
            Self::ConcatStr => "concat_str",
            Self::LtInt => "lt_int",
            Self::LeInt => "le_int",
            Self::GtInt => "gt_int",
            Self::GeInt => "ge_int",
            Self::EqInt => "eq_int",
            Self::NeInt => "ne_int",
            Self::Not => "not",
            Self::BinaryOp => "binary_op",
            Self::InplaceOp => "inplace_op",
            Self::CompareOp => "compare_op",
            Self::UnaryOp => "unary_op",
            Self::IsOp => "is_op",
            Self::ContainsOp => "contains_op",
            Self::GetItem => "get_item",
            Self::SetItem => "set_item",
            Self::DelItem => "del_item",
            Self::InvokeDunder => "invoke_dunder",
            Self::TypeOf => "type_of",
            Self::ExcMatch => "exc_match",
            Self::BuildTuple => "build_tuple",
            Self::BuildList => "build_list",
            Self::BuildSet => "build_set",
            Self::BuildMap => "build_map",
            Self::BuildConstKeyMap => "build_const_key_map",
            Self::BuildSlice => "build_slice",
            Self::ListAppend => "list_append",
            Self::SetAdd => "set_add",
            Self::MapAdd => "map_add",
            Self::ListExtend => "list_extend",
            Self::SetUpdate => "set_update",
            Self::DictUpdate => "dict_update",
            Self::ListToTuple => "list_to_tuple",
            Self::UnpackSequence => "unpack_sequence",
            Self::UnpackEx => "unpack_ex",
            Self::GetIter => "get_iter",
            Self::MakeFunction => "make_function",
            Self::Call => "call",
            Self::CallKw => "call_kw",
            Self::CallEx => "call_ex",
            Self::LoadAttr => "load_attr",
            Self::StoreAttr => "store_attr",
            Self::DeleteAttr => "delete_attr",
            Self::ImportName => "import_name",
            Self::ImportFrom => "import_from",
            Self::FormatValue => "format_value",
            Self::BuildString => "build_string",
            Self::PrintExpr => "print_expr",
            Self::Raise => "raise",
            Self::Reraise => "reraise",
            Self::EnterHandler => "enter_handler",
            Self::ExitHandler => "exit_handler",
            Self::GenResumeIndex => "gen_resume_index",
            Self::GenSetResume => "gen_set_resume",
            Self::GenSaveLocals => "gen_save_locals",
            Self::GenRestoreLocals => "gen_restore_locals",
            Self::GenStoreState => "gen_store_state",
            Self::GenLoadState => "gen_load_state",
            Self::GenYield => "gen_yield",
            Self::GenReturn => "gen_return",
            Self::GenCheckThrow => "gen_check_throw",
            Self::GenSent => "gen_sent",
            Self::GetYieldFromIter => "get_yield_from_iter",
            Self::Halt => "halt",
        }
    }

    /// Check if this opcode is a jump with a signed 2-byte offset
    #[inline]
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Jump | Self::JumpIfFalse | Self::JumpIfTrue | Self::JumpIfNone
            | Self::JumpIfNotNone | Self::ForIter | Self::SendOrJump
        )
    }

    /// Check if this opcode ends the current basic block without falling through
    #[inline]
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Jump | Self::JumpTable | Self::Return | Self::Raise | Self::Reraise
            | Self::GenYield | Self::GenReturn | Self::Halt
        )
    }

    /// Check if executing this opcode can raise a catchable exception
    ///
    /// Stack shuffles, constant pushes, stores and generator state moves never
    /// raise; everything that dispatches into the object model may.
    #[inline]
    pub fn can_raise(self) -> bool {
        !matches!(
            self,
            Self::Nop | Self::Pop | Self::Dup | Self::Swap | Self::Rot3 | Self::Over
            | Self::PopN | Self::Pick | Self::SwapN | Self::RotN
            | Self::PushNone | Self::PushTrue | Self::PushFalse | Self::PushNull
            | Self::PushSmallInt | Self::PushConstant
            | Self::StoreLocal | Self::DeleteLocal | Self::TakeLocal | Self::LoadCell
            | Self::StoreDeref | Self::StoreGlobal
            | Self::Jump | Self::JumpIfFalse | Self::JumpIfTrue | Self::JumpIfNone
            | Self::JumpIfNotNone | Self::JumpTable | Self::Cast | Self::Not
            | Self::IsOp | Self::TypeOf
            | Self::EnterHandler | Self::ExitHandler
            | Self::GenResumeIndex | Self::GenSetResume | Self::GenSaveLocals
            | Self::GenRestoreLocals | Self::GenStoreState | Self::GenLoadState
            | Self::GenYield | Self::GenSent | Self::Halt
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// Lookup table for byte -> Opcode conversion
static OPCODE_TABLE: [Option<Opcode>; 256] = {
    let mut table = [None; 256];

    // Stack operations
    table[0x00] = Some(Opcode::Nop);
    table[0x01] = Some(Opcode::Pop);
    table[0x02] = Some(Opcode::Dup);
    table[0x03] = Some(Opcode::Swap);
    table[0x04] = Some(Opcode::Rot3);
    table[0x05] = Some(Opcode::Over);
    table[0x07] = Some(Opcode::PopN);
    table[0x08] = Some(Opcode::Pick);
    table[0x09] = Some(Opcode::SwapN);
    table[0x0A] = Some(Opcode::RotN);

    // Value creation
    table[0x10] = Some(Opcode::PushNone);
    table[0x11] = Some(Opcode::PushTrue);
    table[0x12] = Some(Opcode::PushFalse);
    table[0x13] = Some(Opcode::PushNull);
    table[0x14] = Some(Opcode::PushSmallInt);
    table[0x15] = Some(Opcode::PushConstant);
    table[0x16] = Some(Opcode::LoadFallback);

    // Variables
    table[0x20] = Some(Opcode::LoadLocal);
    table[0x21] = Some(Opcode::StoreLocal);
    table[0x22] = Some(Opcode::DeleteLocal);
    table[0x23] = Some(Opcode::TakeLocal);
    table[0x25] = Some(Opcode::LoadCell);
    table[0x26] = Some(Opcode::LoadDeref);
    table[0x27] = Some(Opcode::StoreDeref);
    table[0x28] = Some(Opcode::DeleteDeref);
    table[0x29] = Some(Opcode::LoadGlobal);
    table[0x2A] = Some(Opcode::StoreGlobal);
    table[0x2B] = Some(Opcode::DeleteGlobal);

    // Control flow
    table[0x30] = Some(Opcode::Jump);
    table[0x31] = Some(Opcode::JumpIfFalse);
    table[0x32] = Some(Opcode::JumpIfTrue);
    table[0x33] = Some(Opcode::JumpIfNone);
    table[0x34] = Some(Opcode::JumpIfNotNone);
    table[0x35] = Some(Opcode::ForIter);
    table[0x36] = Some(Opcode::JumpTable);
    table[0x37] = Some(Opcode::Return);
    table[0x38] = Some(Opcode::Cast);
    table[0x39] = Some(Opcode::Truthy);
    table[0x3A] = Some(Opcode::SendOrJump);

    // Typed arithmetic
    table[0x40] = Some(Opcode::AddInt);
    table[0x41] = Some(Opcode::SubInt);
    table[0x42] = Some(Opcode::MulInt);
    table[0x43] = Some(Opcode::FloorDivInt);
    table[0x44] = Some(Opcode::ModInt);
    table[0x45] = Some(Opcode::NegInt);
    table[0x48] = Some(Opcode::AddFloat);
    table[0x49] = Some(Opcode::SubFloat);
    table[0x4A] = Some(Opcode::MulFloat);
    table[0x4B] = Some(Opcode::TrueDivFloat);
    table[0x4C] = Some(Opcode::NegFloat);
    table[0x50] = Some(Opcode::ConcatStr);
    table[0x51] = Some(Opcode::LtInt);
    table[0x52] = Some(Opcode::LeInt);
    table[0x53] = Some(Opcode::GtInt);
    table[0x54] = Some(Opcode::GeInt);
    table[0x55] = Some(Opcode::EqInt);
    table[0x56] = Some(Opcode::NeInt);
    table[0x57] = Some(Opcode::Not);

    // Dynamic dispatch
    table[0x60] = Some(Opcode::BinaryOp);
    table[0x61] = Some(Opcode::InplaceOp);
    table[0x62] = Some(Opcode::CompareOp);
    table[0x63] = Some(Opcode::UnaryOp);
    table[0x64] = Some(Opcode::IsOp);
    table[0x65] = Some(Opcode::ContainsOp);
    table[0x66] = Some(Opcode::GetItem);
    table[0x67] = Some(Opcode::SetItem);
    table[0x68] = Some(Opcode::DelItem);
    table[0x69] = Some(Opcode::InvokeDunder);
    table[0x6A] = Some(Opcode::TypeOf);
    table[0x6B] = Some(Opcode::ExcMatch);

    // Collections
    table[0x70] = Some(Opcode::BuildTuple);
    table[0x71] = Some(Opcode::BuildList);
    table[0x72] = Some(Opcode::BuildSet);
    table[0x73] = Some(Opcode::BuildMap);
    table[0x74] = Some(Opcode::BuildConstKeyMap);
    table[0x75] = Some(Opcode::BuildSlice);
    table[0x76] = Some(Opcode::ListAppend);
    table[0x77] = Some(Opcode::SetAdd);
    table[0x78] = Some(Opcode::MapAdd);
    table[0x79] = Some(Opcode::ListExtend);
    table[0x7A] = Some(Opcode::SetUpdate);
    table[0x7B] = Some(Opcode::DictUpdate);
    table[0x7C] = Some(Opcode::ListToTuple);
    table[0x7D] = Some(Opcode::UnpackSequence);
    table[0x7E] = Some(Opcode::UnpackEx);
    table[0x7F] = Some(Opcode::GetIter);

    // Functions and attributes
    table[0x80] = Some(Opcode::MakeFunction);
    table[0x81] = Some(Opcode::Call);
    table[0x82] = Some(Opcode::CallKw);
    table[0x83] = Some(Opcode::CallEx);
    table[0x84] = Some(Opcode::LoadAttr);
    table[0x85] = Some(Opcode::StoreAttr);
    table[0x86] = Some(Opcode::DeleteAttr);
    table[0x87] = Some(Opcode::ImportName);
    table[0x88] = Some(Opcode::ImportFrom);

    // Strings
    table[0x90] = Some(Opcode::FormatValue);
    table[0x91] = Some(Opcode::BuildString);
    table[0x92] = Some(Opcode::PrintExpr);

    // Exceptions
    table[0xA0] = Some(Opcode::Raise);
    table[0xA1] = Some(Opcode::Reraise);
    table[0xA2] = Some(Opcode::EnterHandler);
    table[0xA3] = Some(Opcode::ExitHandler);

    // Generators
    table[0xB0] = Some(Opcode::GenResumeIndex);
    table[0xB1] = Some(Opcode::GenSetResume);
    table[0xB2] = Some(Opcode::GenSaveLocals);
    table[0xB3] = Some(Opcode::GenRestoreLocals);
    table[0xB4] = Some(Opcode::GenStoreState);
    table[0xB5] = Some(Opcode::GenLoadState);
    table[0xB6] = Some(Opcode::GenYield);
    table[0xB7] = Some(Opcode::GenReturn);
    table[0xB8] = Some(Opcode::GenCheckThrow);
    table[0xB9] = Some(Opcode::GenSent);
    table[0xBA] = Some(Opcode::GetYieldFromIter);

    // Debug/meta
    table[0xFF] = Some(Opcode::Halt);

    table
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0..=255u8 {
            if let Some(op) = Opcode::from_byte(byte) {
                assert_eq!(op.to_byte(), byte, "Opcode {:?} roundtrip failed", op);
            }
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert!(Opcode::from_byte(0x06).is_none());
        assert!(Opcode::from_byte(0x24).is_none());
        assert!(Opcode::from_byte(0xC0).is_none());
    }

    #[test]
    fn test_immediate_sizes() {
        assert_eq!(Opcode::Nop.immediate_size(), 0);
        assert_eq!(Opcode::PushSmallInt.immediate_size(), 1);
        assert_eq!(Opcode::PushConstant.immediate_size(), 2);
        assert_eq!(Opcode::Jump.immediate_size(), 2);
        assert_eq!(Opcode::Cast.immediate_size(), 1);
        assert_eq!(Opcode::GenYield.immediate_size(), 0);
    }

    #[test]
    fn test_opcode_categories() {
        assert!(Opcode::Jump.is_jump());
        assert!(Opcode::ForIter.is_jump());
        assert!(!Opcode::JumpTable.is_jump());

        assert!(Opcode::Return.is_terminator());
        assert!(Opcode::GenYield.is_terminator());
        assert!(!Opcode::JumpIfFalse.is_terminator());

        assert!(Opcode::AddInt.can_raise());
        assert!(Opcode::LoadLocal.can_raise());
        assert!(!Opcode::StoreLocal.can_raise());
        assert!(!Opcode::GenStoreState.can_raise());
    }

    #[test]
    fn test_mnemonic() {
        assert_eq!(Opcode::Nop.mnemonic(), "nop");
        assert_eq!(Opcode::PushConstant.mnemonic(), "push_const");
        assert_eq!(Opcode::JumpIfFalse.mnemonic(), "jump_if_false");
        assert_eq!(format!("{}", Opcode::GenYield), "gen_yield");
    }
}
