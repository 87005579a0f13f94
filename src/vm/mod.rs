//! Bytecode Virtual Machine
//!
//! The VM executes verified target chunks with a stack-based architecture.
//! All activations share one operand stack; every call runs a nested
//! dispatch loop over its own frame, and a raised exception is routed
//! through the frame's exception table before it leaves the frame.
//!
//! This module is organized into submodules by functionality:
//! - `types`: Core type definitions (VmError, VmConfig, CallFrame, etc.)
//! - `stack`: Stack manipulation operations
//! - `value_ops`: Constants, locals, cells and globals
//! - `arithmetic`: Typed arithmetic and the operator protocol
//! - `comparison`: Comparisons, truth values, membership and casts
//! - `control_flow`: Jumps, iteration, returns and exceptions
//! - `collections`: Container construction, unpacking and subscripts
//! - `calls`: Function creation, calls and argument binding
//! - `object_ops`: Attributes, imports and string formatting
//! - `generators`: Generator state and the send/throw/close protocol

use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::runtime::builtins::builtins_namespace;
use crate::runtime::{
    from_host, to_host, Closure, EscapedObjects, Host, HostValue, MarshalError, Namespace, StdHost, Value,
};
use crate::target::{BytecodeChunk, Opcode};
use crate::translator::{ClassArtifact, FunctionArtifact, ProxyArtifact};
use crate::types::builtin::{RECURSION_ERROR, TYPE_ERROR};
use crate::types::{TypeId, TypeRegistry};

// === Submodules ===

mod arithmetic;
mod calls;
mod collections;
mod comparison;
mod control_flow;
mod generators;
mod object_ops;
mod stack;
mod types;
mod value_ops;


// === Re-exports ===

pub use types::{CallFrame, ClassObject, FrameExit, VmConfig, VmError, VmResult};

// === BytecodeVM Struct ===

/// The Bytecode Virtual Machine
pub struct BytecodeVM {
    /// Value stack for operands and results
    pub(super) value_stack: Vec<Value>,

    /// Suspended caller frames
    pub(super) call_stack: Vec<CallFrame>,

    /// The executing frame
    pub(super) frame: CallFrame,

    /// Exceptions currently being handled, innermost last
    pub(super) handled: Vec<Value>,

    /// VM configuration
    pub(super) config: VmConfig,

    /// Type lattice shared with the translator that produced the chunks
    pub(super) registry: Arc<TypeRegistry>,

    /// Embedder services
    pub(super) host: Arc<dyn Host>,

    pub(super) builtins: Arc<Namespace>,

    /// Module namespace for chunks run or called directly
    pub(super) globals: Arc<Namespace>,

    /// Loaded classes by type id
    pub(super) classes: HashMap<TypeId, Arc<ClassObject>>,

    /// Instances handed out to the host
    pub(super) escaped: Arc<EscapedObjects>,
}

impl fmt::Debug for BytecodeVM {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytecodeVM")
            .field("stack_depth", &self.value_stack.len())
            .field("call_depth", &self.call_stack.len())
            .field("frame", &self.frame.chunk.name())
            .field("classes", &self.classes.len())
            .field("config", &self.config)
            .finish()
    }
}

impl BytecodeVM {
    // === Constructors ===

    /// Create a new VM over the registry the chunks were translated against
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::with_config(registry, VmConfig::default())
    }

    /// Create a new VM with custom configuration
    pub fn with_config(registry: Arc<TypeRegistry>, config: VmConfig) -> Self {
        Self::with_host(registry, config, Arc::new(StdHost::new()))
    }

    /// Create a new VM with custom configuration and host
    pub fn with_host(registry: Arc<TypeRegistry>, config: VmConfig, host: Arc<dyn Host>) -> Self {
        let globals = Arc::new(Namespace::new());
        Self {
            value_stack: Vec::with_capacity(256),
            call_stack: Vec::with_capacity(64),
            frame: CallFrame::new(Arc::new(BytecodeChunk::empty("<idle>")), globals.clone()),
            handled: Vec::new(),
            config,
            registry,
            host,
            builtins: Arc::new(builtins_namespace()),
            globals,
            classes: HashMap::new(),
            escaped: Arc::new(EscapedObjects::new()),
        }
    }

    // === Accessors ===

    pub fn globals(&self) -> &Arc<Namespace> {
        &self.globals
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn escaped(&self) -> &Arc<EscapedObjects> {
        &self.escaped
    }

    /// Copy a value out for the host
    pub fn export(&self, value: &Value) -> Result<HostValue, MarshalError> {
        to_host(value, &self.escaped)
    }

    /// Rebuild a host value for use by translated code
    pub fn import(&self, value: HostValue) -> Result<Value, MarshalError> {
        from_host(value, &self.escaped)
    }

    // === Execution Methods ===

    /// Run a module-level chunk against the VM's globals, returning its result
    pub fn run(&mut self, chunk: Arc<BytecodeChunk>) -> VmResult<Value> {
        let frame = CallFrame::new(chunk, self.globals.clone());
        match self.execute(frame)? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Yield(_) => Err(VmError::Runtime("yield outside a generator frame".into())),
        }
    }

    /// Call a translated function with positional arguments
    ///
    /// A generator function returns its generator object without running it.
    pub fn call_function(&mut self, function: &FunctionArtifact, args: Vec<Value>) -> VmResult<Value> {
        let closure = Arc::new(Closure::new(function.chunk.clone(), self.globals.clone()));
        self.call_closure(&closure, args, Vec::new())
    }

    /// Make a translated class available to calls, attribute lookups and globals
    pub fn load_class(&mut self, class: &ClassArtifact) -> VmResult<Value> {
        let attrs = Namespace::new();
        let mut method_kinds = HashMap::with_capacity(class.methods.len());
        for (name, value) in &class.static_attributes {
            attrs.set(name.clone(), value.clone());
        }
        for method in &class.methods {
            let closure = Closure::new(method.function.chunk.clone(), self.globals.clone());
            attrs.set(method.name.clone(), Value::Function(Arc::new(closure)));
            method_kinds.insert(method.name.clone(), method.kind);
        }
        let short_name: Arc<str> = Arc::from(class.qualified_name.rsplit('.').next().unwrap_or(&class.qualified_name));
        let object = ClassObject { type_id: class.type_id, name: short_name.clone(), attrs, method_kinds };
        self.classes.insert(class.type_id, Arc::new(object));
        self.globals.set(short_name, Value::Type(class.type_id));
        debug!(
            target: "pytron::vm::call",
            class = %class.qualified_name,
            type_id = class.type_id.0,
            methods = class.methods.len(),
            "loaded class"
        );
        Ok(Value::Type(class.type_id))
    }

    /// Call interface method `method` of `receiver` through a proxy
    pub fn call_proxy(
        &mut self,
        proxy: &ProxyArtifact,
        method: &str,
        receiver: Value,
        args: Vec<Value>,
    ) -> VmResult<Value> {
        if !self.registry.is_subclass(receiver.type_id(), proxy.target) {
            return Err(VmError::raise(
                TYPE_ERROR,
                format!("{} expects a '{}' receiver, got '{}'", proxy.name, self.registry.name_of(proxy.target), self.type_name(&receiver)),
            ));
        }
        let chunk = proxy
            .methods
            .iter()
            .find(|(name, _)| name.as_ref() == method)
            .map(|(_, chunk)| chunk.clone())
            .ok_or_else(|| VmError::raise(TYPE_ERROR, format!("{} has no method '{}'", proxy.name, method)))?;
        let closure = Arc::new(Closure::new(chunk, self.globals.clone()));
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(receiver);
        full.extend(args);
        self.call_closure(&closure, full, Vec::new())
    }

    /// Run `frame` until it returns or suspends, then restore the caller
    pub(super) fn execute(&mut self, mut frame: CallFrame) -> VmResult<FrameExit> {
        if self.call_stack.len() >= self.config.max_call_depth {
            return Err(VmError::raise(RECURSION_ERROR, "maximum recursion depth exceeded"));
        }
        frame.base_ptr = self.value_stack.len();
        frame.handled_base = self.handled.len();
        let caller = std::mem::replace(&mut self.frame, frame);
        self.call_stack.push(caller);

        let result = self.run_loop();

        self.value_stack.truncate(self.frame.base_ptr);
        self.handled.truncate(self.frame.handled_base);
        if let Some(caller) = self.call_stack.pop() {
            self.frame = caller;
        }
        result
    }

    fn run_loop(&mut self) -> VmResult<FrameExit> {
        loop {
            match self.step() {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(exit)) => return Ok(exit),
                Err(VmError::Exception(exc)) => self.unwind(exc)?,
                Err(other) => return Err(other),
            }
        }
    }

    /// Route an exception raised by the current instruction to its handler
    ///
    /// The handler sees the stack cut back to the range's depth with the
    /// exception on top. Without a covering range the exception leaves the frame.
    fn unwind(&mut self, exc: Value) -> VmResult<()> {
        let op_ip = self.frame.op_ip;
        let raising = self.frame.chunk.read_opcode(op_ip).is_some_and(Opcode::can_raise);
        let entry = if raising {
            self.frame.chunk.find_handler(op_ip).map(|entry| (entry.handler, entry.depth as usize))
        } else {
            None
        };
        match entry {
            Some((handler, depth)) => {
                trace!(target: "pytron::vm::step", ip = op_ip, handler, depth, "exception caught");
                self.value_stack.truncate(self.frame.base_ptr + depth);
                self.push(exc);
                self.frame.ip = handler;
                Ok(())
            }
            None => Err(VmError::Exception(exc)),
        }
    }

    /// Execute a single instruction
    pub(super) fn step(&mut self) -> VmResult<ControlFlow<FrameExit>> {
        let ip = self.frame.ip;
        let opcode_byte = self.frame.chunk.read_byte(ip).ok_or(VmError::IpOutOfBounds)?;
        let opcode = Opcode::from_byte(opcode_byte).ok_or(VmError::InvalidOpcode(opcode_byte))?;

        // Trace if enabled
        if self.config.trace {
            let (disasm, _) = self.frame.chunk.disassemble_instruction(ip);
            trace!(target: "pytron::vm::step", ip, mnemonic = %disasm, stack_depth = self.value_stack.len());
        }

        if self.value_stack.len() >= self.config.max_value_stack {
            return Err(VmError::ValueStackOverflow);
        }

        self.frame.op_ip = ip;
        self.frame.ip = ip + 1;

        match opcode {
            // Stack operations
            Opcode::Nop => {}
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Dup => self.op_dup()?,
            Opcode::Swap => self.op_swap()?,
            Opcode::Rot3 => self.op_rot3()?,
            Opcode::Over => self.op_over()?,
            Opcode::PopN => self.op_pop_n()?,
            Opcode::Pick => self.op_pick()?,
            Opcode::SwapN => self.op_swap_n()?,
            Opcode::RotN => self.op_rot_n()?,

            // Value creation
            Opcode::PushNone => self.push(Value::None),
            Opcode::PushTrue => self.push(Value::Bool(true)),
            Opcode::PushFalse => self.push(Value::Bool(false)),
            Opcode::PushNull => self.push(Value::Null),
            Opcode::PushSmallInt => self.op_push_small_int()?,
            Opcode::PushConstant => self.op_push_constant()?,
            Opcode::LoadFallback => self.op_load_fallback()?,

            // Variables
            Opcode::LoadLocal => self.op_load_local()?,
            Opcode::StoreLocal => self.op_store_local()?,
            Opcode::DeleteLocal => self.op_delete_local()?,
            Opcode::TakeLocal => self.op_take_local()?,
            Opcode::LoadCell => self.op_load_cell()?,
            Opcode::LoadDeref => self.op_load_deref()?,
            Opcode::StoreDeref => self.op_store_deref()?,
            Opcode::DeleteDeref => self.op_delete_deref()?,
            Opcode::LoadGlobal => self.op_load_global()?,
            Opcode::StoreGlobal => self.op_store_global()?,
            Opcode::DeleteGlobal => self.op_delete_global()?,

            // Control flow
            Opcode::Jump => self.op_jump()?,
            Opcode::JumpIfFalse => self.op_jump_if(false)?,
            Opcode::JumpIfTrue => self.op_jump_if(true)?,
            Opcode::JumpIfNone => self.op_jump_if_none(true)?,
            Opcode::JumpIfNotNone => self.op_jump_if_none(false)?,
            Opcode::ForIter => self.op_for_iter()?,
            Opcode::JumpTable => self.op_jump_table()?,
            Opcode::Return => return Ok(ControlFlow::Break(FrameExit::Return(self.pop()?))),
            Opcode::Cast => self.op_cast()?,
            Opcode::Truthy => self.op_truthy()?,
            Opcode::SendOrJump => self.op_send_or_jump()?,

            // Typed arithmetic
            Opcode::AddInt
            | Opcode::SubInt
            | Opcode::MulInt
            | Opcode::FloorDivInt
            | Opcode::ModInt => self.op_int_arith(opcode)?,
            Opcode::NegInt => self.op_neg_int()?,
            Opcode::AddFloat | Opcode::SubFloat | Opcode::MulFloat | Opcode::TrueDivFloat => {
                self.op_float_arith(opcode)?
            }
            Opcode::NegFloat => self.op_neg_float()?,
            Opcode::ConcatStr => self.op_concat_str()?,
            Opcode::LtInt | Opcode::LeInt | Opcode::GtInt | Opcode::GeInt | Opcode::EqInt | Opcode::NeInt => {
                self.op_int_compare(opcode)?
            }
            Opcode::Not => self.op_not()?,

            // Dynamic dispatch
            Opcode::BinaryOp => self.op_binary()?,
            Opcode::InplaceOp => self.op_inplace()?,
            Opcode::CompareOp => self.op_compare()?,
            Opcode::UnaryOp => self.op_unary()?,
            Opcode::IsOp => self.op_is()?,
            Opcode::ContainsOp => self.op_contains()?,
            Opcode::GetItem => self.op_get_item()?,
            Opcode::SetItem => self.op_set_item()?,
            Opcode::DelItem => self.op_del_item()?,
            Opcode::InvokeDunder => self.op_invoke_dunder()?,
            Opcode::TypeOf => self.op_type_of()?,
            Opcode::ExcMatch => self.op_exc_match()?,

            // Collections
            Opcode::BuildTuple => self.op_build_tuple()?,
            Opcode::BuildList => self.op_build_list()?,
            Opcode::BuildSet => self.op_build_set()?,
            Opcode::BuildMap => self.op_build_map()?,
            Opcode::BuildConstKeyMap => self.op_build_const_key_map()?,
            Opcode::BuildSlice => self.op_build_slice()?,
            Opcode::ListAppend => self.op_list_append()?,
            Opcode::SetAdd => self.op_set_add()?,
            Opcode::MapAdd => self.op_map_add()?,
            Opcode::ListExtend => self.op_list_extend()?,
            Opcode::SetUpdate => self.op_set_update()?,
            Opcode::DictUpdate => self.op_dict_update()?,
            Opcode::ListToTuple => self.op_list_to_tuple()?,
            Opcode::UnpackSequence => self.op_unpack_sequence()?,
            Opcode::UnpackEx => self.op_unpack_ex()?,
            Opcode::GetIter => self.op_get_iter()?,

            // Functions and attributes
            Opcode::MakeFunction => self.op_make_function()?,
            Opcode::Call => self.op_call()?,
            Opcode::CallKw => self.op_call_kw()?,
            Opcode::CallEx => self.op_call_ex()?,
            Opcode::LoadAttr => self.op_load_attr()?,
            Opcode::StoreAttr => self.op_store_attr()?,
            Opcode::DeleteAttr => self.op_delete_attr()?,
            Opcode::ImportName => self.op_import_name()?,
            Opcode::ImportFrom => self.op_import_from()?,

            // Strings
            Opcode::FormatValue => self.op_format_value()?,
            Opcode::BuildString => self.op_build_string()?,
            Opcode::PrintExpr => self.op_print_expr()?,

            // Exceptions
            Opcode::Raise => return Err(self.op_raise()?),
            Opcode::Reraise => return Err(VmError::Exception(self.pop()?)),
            Opcode::EnterHandler => self.op_enter_handler()?,
            Opcode::ExitHandler => self.op_exit_handler(),

            // Generators
            Opcode::GenResumeIndex => self.op_gen_resume_index()?,
            Opcode::GenSetResume => self.op_gen_set_resume()?,
            Opcode::GenSaveLocals => self.op_gen_save_locals()?,
            Opcode::GenRestoreLocals => self.op_gen_restore_locals()?,
            Opcode::GenStoreState => self.op_gen_store_state()?,
            Opcode::GenLoadState => self.op_gen_load_state()?,
            Opcode::GenYield => return Ok(ControlFlow::Break(FrameExit::Yield(self.pop()?))),
            Opcode::GenReturn => return Ok(ControlFlow::Break(FrameExit::Return(self.pop()?))),
            Opcode::GenCheckThrow => self.op_gen_check_throw()?,
            Opcode::GenSent => self.op_gen_sent()?,
            Opcode::GetYieldFromIter => self.op_get_yield_from_iter()?,

            Opcode::Halt => return Err(VmError::Halted),
        }

        Ok(ControlFlow::Continue(()))
    }

    // === Operand Readers ===

    #[inline]
    pub(super) fn read_u8(&mut self) -> VmResult<u8> {
        let byte = self.frame.chunk.read_byte(self.frame.ip).ok_or(VmError::IpOutOfBounds)?;
        self.frame.ip += 1;
        Ok(byte)
    }

    #[inline]
    pub(super) fn read_u16(&mut self) -> VmResult<u16> {
        let value = self.frame.chunk.read_u16(self.frame.ip).ok_or(VmError::IpOutOfBounds)?;
        self.frame.ip += 2;
        Ok(value)
    }

    #[inline]
    pub(super) fn read_i16(&mut self) -> VmResult<i16> {
        let value = self.frame.chunk.read_i16(self.frame.ip).ok_or(VmError::IpOutOfBounds)?;
        self.frame.ip += 2;
        Ok(value)
    }

    /// Name operand of the current instruction
    pub(super) fn read_name(&mut self) -> VmResult<Arc<str>> {
        let index = self.read_u16()?;
        self.frame.chunk.get_name(index).cloned().ok_or_else(|| self.invalid_operand(u32::from(index)))
    }

    /// Internal error for an operand the current instruction cannot use
    pub(super) fn invalid_operand(&self, operand: u32) -> VmError {
        let opcode = self.frame.chunk.read_opcode(self.frame.op_ip).unwrap_or(Opcode::Nop);
        VmError::InvalidOperand { opcode, operand }
    }
}
