// The bridge runtime: the only doorway between bytecode and the
// host. Every call is checked against the capability policy, then
// dispatched to the routine registered for its symbol. Routines may
// write lines to the print sink, build view-node dictionaries, or
// consult the script context the host pushed around the run.
//
// The script context rides a thread-local stack so parallel VMs on
// different threads never see each other's state. Pushing returns a
// guard that pops on drop, which keeps the stack balanced on every
// exit path.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::SystemTime;

use tracing::warn;

use crate::catalog::{CapabilitySet, SymbolPolicy};
use crate::error::ErrorKind;
use crate::ids::SymbolId;
use crate::ir::{BINDING_TAG, STATE_TAG};
use crate::value::{NativeValue, Value};

/******************************************************************************/
// Script context

// The scope-threaded handle onto host state. The host pushes one
// around a run; state bridges consult the innermost context and fall
// back to none / no-op when the stack is empty.
pub trait ScriptContext {
    fn state_get(&self, path: &str) -> Value;
    fn state_set(&self, path: &str, value: Value);
    fn state_bind(&self, path: &str) -> Value;
}

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Rc<dyn ScriptContext>>> = RefCell::new(Vec::new());
}

// RAII handle for one pushed context.
pub struct ScriptContextGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ScriptContextGuard {
    pub fn push(context: Rc<dyn ScriptContext>) -> ScriptContextGuard {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(context));
        ScriptContextGuard { _not_send: std::marker::PhantomData }
    }
}

impl Drop for ScriptContextGuard {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

fn with_current_context<R>(body: impl FnOnce(Option<&Rc<dyn ScriptContext>>) -> R) -> R {
    CONTEXT_STACK.with(|stack| {
        let stack = stack.borrow();
        body(stack.last())
    })
}

/******************************************************************************/
// Runtime

// Where bridge print output lands. The VM hands its output buffer in
// through this seam, and tests can capture lines the same way.
pub trait PrintSink {
    fn print(&mut self, line: String);
}

impl PrintSink for Vec<String> {
    fn print(&mut self, line: String) {
        self.push(line);
    }
}

// One bridge invocation, as the routine sees it.
pub struct Invocation<'a> {
    pub symbol: SymbolId,
    pub receiver: Option<Value>,
    pub args: Vec<Value>,
    pub sink: &'a mut dyn PrintSink,
}

impl<'a> Invocation<'a> {
    fn arg(&self, index: usize) -> Result<&Value, ErrorKind> {
        self.args
            .get(index)
            .ok_or_else(|| ErrorKind::Bridge(format!("missing argument {}", index)))
    }

    fn opt_arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    fn receiver(&self) -> Result<&Value, ErrorKind> {
        self.receiver
            .as_ref()
            .ok_or_else(|| ErrorKind::Bridge("missing receiver".to_string()))
    }
}

type Handler = fn(&mut Invocation) -> Result<Value, ErrorKind>;
type Override = Box<dyn Fn(&mut Invocation) -> Result<Value, ErrorKind>>;

pub struct BridgeRuntime {
    capabilities: CapabilitySet,
    overrides: HashMap<SymbolId, Override>,
}

impl BridgeRuntime {
    pub fn new(capabilities: CapabilitySet) -> BridgeRuntime {
        BridgeRuntime { capabilities, overrides: HashMap::new() }
    }

    // Host extension point: replace the routine behind a cataloged
    // symbol for this runtime instance. The capability gate still
    // applies.
    pub fn register(
        &mut self,
        symbol: SymbolId,
        handler: impl Fn(&mut Invocation) -> Result<Value, ErrorKind> + 'static,
    ) {
        self.overrides.insert(symbol, Box::new(handler));
    }

    pub fn invoke(
        &self,
        symbol: SymbolId,
        receiver: Option<Value>,
        args: Vec<Value>,
        sink: &mut dyn PrintSink,
    ) -> Result<Value, ErrorKind> {
        if !SymbolPolicy::is_allowed(symbol, self.capabilities) {
            warn!(symbol = %symbol, "bridge call denied by policy");
            return Err(ErrorKind::BridgeDenied(symbol));
        }
        let mut invocation = Invocation { symbol, receiver, args, sink };
        if let Some(handler) = self.overrides.get(&symbol) {
            return handler(&mut invocation);
        }
        match HANDLERS.get(&symbol) {
            Some(handler) => handler(&mut invocation),
            None => Err(ErrorKind::UnknownBridge(symbol)),
        }
    }
}

lazy_static! {
    static ref HANDLERS: HashMap<SymbolId, Handler> = {
        let mut table: HashMap<SymbolId, Handler> = HashMap::new();

        table.insert(SymbolId::of("print"), print_line);
        table.insert(SymbolId::of("String.uppercased"), string_uppercased);
        table.insert(SymbolId::of("String.lowercased"), string_lowercased);
        table.insert(SymbolId::of("String.contains"), string_contains);
        table.insert(SymbolId::of("Int.init"), int_init);
        table.insert(SymbolId::of("Double.init"), double_init);
        table.insert(SymbolId::of("Bool.init"), bool_init);
        table.insert(SymbolId::of("Date.now"), date_now);

        table.insert(SymbolId::operator("+"), op_add);
        table.insert(SymbolId::operator("-"), op_sub);
        table.insert(SymbolId::operator("*"), op_mul);
        table.insert(SymbolId::operator("/"), op_div);
        table.insert(SymbolId::operator("=="), op_eq);
        table.insert(SymbolId::operator("<"), op_lt);
        table.insert(SymbolId::operator(">"), op_gt);
        table.insert(SymbolId::operator("<="), op_lte);
        table.insert(SymbolId::operator(">="), op_gte);
        table.insert(SymbolId::operator("&&"), op_and);
        table.insert(SymbolId::operator("||"), op_or);

        table.insert(SymbolId::of("Text"), ui_text);
        table.insert(SymbolId::of("Button"), ui_button);
        table.insert(SymbolId::of("VStack"), ui_vstack);
        table.insert(SymbolId::of("HStack"), ui_hstack);
        table.insert(SymbolId::of("Spacer"), ui_spacer);
        table.insert(SymbolId::of("Image"), ui_image);
        table.insert(SymbolId::of("TextField"), ui_text_field);
        table.insert(SymbolId::of("Toggle"), ui_toggle);

        table.insert(SymbolId::of("padding"), mod_padding);
        table.insert(SymbolId::of("font"), mod_font);
        table.insert(SymbolId::of("foregroundStyle"), mod_foreground_style);
        table.insert(SymbolId::of("frame"), mod_frame);
        table.insert(SymbolId::of("background"), mod_background);

        table.insert(SymbolId::of("onTap"), event_on_tap);
        table.insert(SymbolId::of("onAppear"), event_on_appear);
        table.insert(SymbolId::of("onChange"), event_on_change);

        table.insert(SymbolId::of("State.init"), state_init);
        table.insert(SymbolId::of("State.get"), state_get);
        table.insert(SymbolId::of("State.set"), state_set);
        table.insert(SymbolId::of("State.bind"), state_bind);

        table
    };
}

/******************************************************************************/
// Foundation routines

fn print_line(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let text = invocation.arg(0)?.to_string();
    invocation.sink.print(text);
    Ok(Value::Nil)
}

fn string_uppercased(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    Ok(Value::str(invocation.receiver()?.expect_str()?.to_uppercase()))
}

fn string_lowercased(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    Ok(Value::str(invocation.receiver()?.expect_str()?.to_lowercase()))
}

fn string_contains(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let haystack = invocation.receiver()?.expect_str()?;
    let needle = invocation.arg(0)?.expect_str()?;
    Ok(Value::Bool(haystack.contains(needle)))
}

fn int_init(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    match invocation.arg(0)? {
        Value::Int(v) => Ok(Value::Int(*v)),
        Value::Float(v) => Ok(Value::Int(*v as i64)),
        Value::Bool(v) => Ok(Value::Int(i64::from(*v))),
        Value::Str(v) => v
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| ErrorKind::Bridge(format!("cannot convert {:?} to int", v))),
        other => Err(ErrorKind::TypeError { expected: "number", got: other.type_name() }),
    }
}

fn double_init(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    match invocation.arg(0)? {
        Value::Int(v) => Ok(Value::Float(*v as f64)),
        Value::Float(v) => Ok(Value::Float(*v)),
        Value::Bool(v) => Ok(Value::Float(f64::from(u8::from(*v)))),
        Value::Str(v) => v
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| ErrorKind::Bridge(format!("cannot convert {:?} to double", v))),
        other => Err(ErrorKind::TypeError { expected: "number", got: other.type_name() }),
    }
}

fn bool_init(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    Ok(Value::Bool(invocation.arg(0)?.truthy()))
}

fn date_now(_invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    Ok(Value::Native(NativeValue::new(SystemTime::now())))
}

/******************************************************************************/
// Operator routines

macro_rules! binary_op {
    ($name:ident, $method:ident) => {
        fn $name(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
            invocation.arg(0)?.$method(invocation.arg(1)?)
        }
    };
}

binary_op!(op_add, add);
binary_op!(op_sub, sub);
binary_op!(op_mul, mul);
binary_op!(op_div, div);
binary_op!(op_eq, eq_value);
binary_op!(op_lt, lt);
binary_op!(op_gt, gt);
binary_op!(op_lte, lte);
binary_op!(op_gte, gte);
binary_op!(op_and, and_value);
binary_op!(op_or, or_value);

/******************************************************************************/
// View-node routines
//
// Nodes are ordinary dictionaries in the value space; the ir module
// maps them into the renderer's tree. Modifiers and events append to
// the receiver's lists, copy-on-write like everything else.

fn node(kind: &str, props: BTreeMap<String, Value>, children: Vec<Value>) -> Value {
    let mut entries = BTreeMap::new();
    entries.insert("type".to_string(), Value::str(kind));
    entries.insert("props".to_string(), Value::dict(props));
    entries.insert("children".to_string(), Value::list(children));
    entries.insert("modifiers".to_string(), Value::list(Vec::new()));
    entries.insert("events".to_string(), Value::list(Vec::new()));
    Value::dict(entries)
}

fn expect_node(value: &Value) -> Result<&BTreeMap<String, Value>, ErrorKind> {
    match value {
        Value::Dict(entries) => Ok(entries),
        other => Err(ErrorKind::TypeError { expected: "dict", got: other.type_name() }),
    }
}

// Returns the receiver node with `entry` appended to its `list_key`
// list.
fn append_to_list(
    invocation: &Invocation,
    list_key: &str,
    entry: Value,
) -> Result<Value, ErrorKind> {
    let receiver = invocation.receiver()?;
    let entries = expect_node(receiver)?;
    let mut updated = entries.clone();
    let mut list = match updated.get(list_key) {
        Some(Value::List(items)) => (**items).clone(),
        _ => Vec::new(),
    };
    list.push(entry);
    updated.insert(list_key.to_string(), Value::list(list));
    Ok(Value::dict(updated))
}

fn ui_text(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let mut props = BTreeMap::new();
    if let Some(text) = invocation.opt_arg(0) {
        props.insert("text".to_string(), text.clone());
    }
    Ok(node("Text", props, Vec::new()))
}

fn ui_button(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let mut props = BTreeMap::new();
    if let Some(label) = invocation.opt_arg(0) {
        props.insert("label".to_string(), label.clone());
    }
    Ok(node("Button", props, Vec::new()))
}

fn ui_vstack(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    Ok(node("VStack", BTreeMap::new(), invocation.args.clone()))
}

fn ui_hstack(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    Ok(node("HStack", BTreeMap::new(), invocation.args.clone()))
}

fn ui_spacer(_invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    Ok(node("Spacer", BTreeMap::new(), Vec::new()))
}

fn ui_image(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let mut props = BTreeMap::new();
    if let Some(name) = invocation.opt_arg(0) {
        props.insert("name".to_string(), name.clone());
    }
    Ok(node("Image", props, Vec::new()))
}

fn ui_text_field(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let mut props = BTreeMap::new();
    if let Some(placeholder) = invocation.opt_arg(0) {
        props.insert("placeholder".to_string(), placeholder.clone());
    }
    if let Some(binding) = invocation.opt_arg(1) {
        props.insert("text".to_string(), binding.clone());
    }
    Ok(node("TextField", props, Vec::new()))
}

fn ui_toggle(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let mut props = BTreeMap::new();
    if let Some(label) = invocation.opt_arg(0) {
        props.insert("label".to_string(), label.clone());
    }
    if let Some(binding) = invocation.opt_arg(1) {
        props.insert("isOn".to_string(), binding.clone());
    }
    Ok(node("Toggle", props, Vec::new()))
}

fn modifier(kind: &str, params: BTreeMap<String, Value>) -> Value {
    let mut entries = BTreeMap::new();
    entries.insert("type".to_string(), Value::str(kind));
    entries.insert("params".to_string(), Value::dict(params));
    Value::dict(entries)
}

fn mod_padding(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let mut params = BTreeMap::new();
    if let Some(amount) = invocation.opt_arg(0) {
        params.insert("value".to_string(), amount.clone());
    }
    append_to_list(invocation, "modifiers", modifier("padding", params))
}

fn mod_font(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let mut params = BTreeMap::new();
    if let Some(style) = invocation.opt_arg(0) {
        params.insert("style".to_string(), style.clone());
    }
    append_to_list(invocation, "modifiers", modifier("font", params))
}

fn mod_foreground_style(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let mut params = BTreeMap::new();
    if let Some(style) = invocation.opt_arg(0) {
        params.insert("style".to_string(), style.clone());
    }
    append_to_list(invocation, "modifiers", modifier("foregroundStyle", params))
}

fn mod_frame(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let mut params = BTreeMap::new();
    if let Some(width) = invocation.opt_arg(0) {
        params.insert("width".to_string(), width.clone());
    }
    if let Some(height) = invocation.opt_arg(1) {
        params.insert("height".to_string(), height.clone());
    }
    append_to_list(invocation, "modifiers", modifier("frame", params))
}

fn mod_background(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let mut params = BTreeMap::new();
    if let Some(color) = invocation.opt_arg(0) {
        params.insert("color".to_string(), color.clone());
    }
    append_to_list(invocation, "modifiers", modifier("background", params))
}

fn event(kind: &str, invocation: &Invocation) -> Result<Value, ErrorKind> {
    let mut entry = BTreeMap::new();
    entry.insert("event".to_string(), Value::str(kind));
    if let Some(action) = invocation.opt_arg(0) {
        entry.insert("action_id".to_string(), action.clone());
    }
    if let Some(path) = invocation.opt_arg(1) {
        entry.insert("path".to_string(), path.clone());
    }
    append_to_list(invocation, "events", Value::dict(entry))
}

fn event_on_tap(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    event("tap", invocation)
}

fn event_on_appear(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    event("appear", invocation)
}

fn event_on_change(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    event("change", invocation)
}

/******************************************************************************/
// State routines

fn state_path(handle: &Value) -> Result<String, ErrorKind> {
    if let Value::Dict(entries) = handle {
        if let Some(Value::Str(path)) = entries.get(STATE_TAG) {
            return Ok(path.to_string());
        }
        if let Some(Value::Str(path)) = entries.get(BINDING_TAG) {
            return Ok(path.to_string());
        }
    }
    Err(ErrorKind::TypeError { expected: "state handle", got: handle.type_name() })
}

fn state_init(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let path = invocation.arg(0)?.expect_str()?.to_string();
    let mut entries = BTreeMap::new();
    entries.insert(STATE_TAG.to_string(), Value::str(path));
    Ok(Value::dict(entries))
}

fn state_get(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let path = state_path(invocation.receiver()?)?;
    Ok(with_current_context(|context| match context {
        Some(context) => context.state_get(&path),
        None => Value::Nil,
    }))
}

fn state_set(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let path = state_path(invocation.receiver()?)?;
    let value = invocation.arg(0)?.clone();
    with_current_context(|context| {
        if let Some(context) = context {
            context.state_set(&path, value);
        }
    });
    Ok(Value::Nil)
}

fn state_bind(invocation: &mut Invocation) -> Result<Value, ErrorKind> {
    let path = state_path(invocation.receiver()?)?;
    Ok(with_current_context(|context| match context {
        Some(context) => context.state_bind(&path),
        None => Value::Nil,
    }))
}
