//! Native functions available to every Skarn module

use crate::bytecode::{Bindings, NativeFunction, Value};

use super::error::{RuntimeError, RuntimeErrorKind, RuntimeResult};
use super::Vm;

/// Install the native functions into a binding mapping
pub fn install(globals: &Bindings) {
    let natives = [
        NativeFunction::new("print", None, native_print),
        NativeFunction::new("println", None, native_println),
        NativeFunction::new("input", None, native_input),
        NativeFunction::new("arg", Some(1), native_arg),
    ];
    let mut map = globals.borrow_mut();
    for native in natives {
        map.insert(native.name.clone(), Value::Native(native));
    }
}

fn join_args(args: &[Value]) -> String {
    args.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn native_print(vm: &mut Vm, args: &[Value]) -> RuntimeResult<Value> {
    vm.console().out.write_text(&join_args(args));
    Ok(Value::Null)
}

fn native_println(vm: &mut Vm, args: &[Value]) -> RuntimeResult<Value> {
    let mut text = join_args(args);
    text.push('\n');
    vm.console().out.write_text(&text);
    Ok(Value::Null)
}

/// Read one line of input; an optional argument is printed as a prompt
fn native_input(vm: &mut Vm, args: &[Value]) -> RuntimeResult<Value> {
    if let Some(prompt) = args.first() {
        vm.console().out.write_text(&prompt.to_string());
    }
    let line = vm
        .console()
        .input
        .read_line()
        .map_err(|e| RuntimeError::new(RuntimeErrorKind::Io(e.to_string())))?;
    Ok(Value::from(line.trim_end_matches(['\n', '\r'])))
}

/// The n-th entry of the target's argument vector, or null past the end
fn native_arg(vm: &mut Vm, args: &[Value]) -> RuntimeResult<Value> {
    let Value::Int(index) = &args[0] else {
        return Err(RuntimeError::new(RuntimeErrorKind::TypeError {
            expected: "int",
            got: args[0].type_name(),
            operation: "arg",
        }));
    };
    let value = usize::try_from(*index)
        .ok()
        .and_then(|i| vm.argv().get(i))
        .map_or(Value::Null, |s| Value::from(s.as_str()));
    Ok(value)
}
