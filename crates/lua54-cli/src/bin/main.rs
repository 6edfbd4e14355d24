use lua54::{ControlFlow, ErrorKind, Interpreter, Value};
use std::env;
use std::fs;
use std::io::{self, BufRead, Read, Write};

const VERSION: &str = "Lua 5.4 (lua54-rs)";
const COPYRIGHT: &str = "Copyright (C) 2026 the lua54 contributors";

fn print_usage() {
    eprintln!("usage: lua54 [options] [script [args]]");
    eprintln!("Available options are:");
    eprintln!("  -e stat   execute string 'stat'");
    eprintln!("  -i        enter interactive mode after executing 'script'");
    eprintln!("  -l mod    stop and report that module loading is unsupported");
    eprintln!("  -v        show version information");
    eprintln!("  -E        ignore environment variables");
    eprintln!("  -W        turn warnings on (no-op; no warning subsystem)");
    eprintln!("  --        stop handling options");
    eprintln!("  -         stop handling options and execute stdin");
}

fn print_version() {
    println!("{}", VERSION);
    println!("{}", COPYRIGHT);
}

#[derive(Default)]
struct Options {
    execute_strings: Vec<String>,
    interactive: bool,
    script_file: Option<String>,
    script_args: Vec<String>,
    require_modules: Vec<String>,
    show_version: bool,
    read_stdin: bool,
    ignore_env: bool,
    warnings_on: bool,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut opts = Options::default();
    let mut i = 1;
    let mut stop_options = false;

    while i < args.len() {
        let arg = &args[i];

        if !stop_options && arg.starts_with('-') {
            match arg.as_str() {
                "-e" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("'-e' needs argument".to_string());
                    }
                    opts.execute_strings.push(args[i].clone());
                }
                "-i" => {
                    opts.interactive = true;
                }
                "-l" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("'-l' needs argument".to_string());
                    }
                    opts.require_modules.push(args[i].clone());
                }
                "-v" => {
                    opts.show_version = true;
                }
                "-E" => {
                    opts.ignore_env = true;
                }
                "-W" => {
                    opts.warnings_on = true;
                }
                "--" => {
                    stop_options = true;
                }
                "-" => {
                    opts.read_stdin = true;
                    stop_options = true;
                }
                _ => {
                    return Err(format!("unrecognized option '{}'", arg));
                }
            }
        } else {
            opts.script_file = Some(arg.clone());
            i += 1;
            while i < args.len() {
                opts.script_args.push(args[i].clone());
                i += 1;
            }
            break;
        }
        i += 1;
    }

    Ok(opts)
}

fn setup_arg_table(interp: &mut Interpreter, exe_path: &str, script_name: Option<&str>, args: &[String]) {
    let arg_table = Value::new_table();
    {
        let t = arg_table.as_table().unwrap();
        let mut t = t.borrow_mut();
        if let Some(name) = script_name {
            let s = interp.intern(name);
            t.set(Value::Integer(0), s).ok();
        }
        let exe = interp.intern(exe_path);
        t.set(Value::Integer(-1), exe).ok();
        for (i, a) in args.iter().enumerate() {
            let s = interp.intern(a);
            t.set(Value::Integer((i + 1) as i64), s).ok();
        }
    }
    interp.set_global("arg", arg_table);
}

fn render_uncaught(err: ControlFlow) -> String {
    match err {
        ControlFlow::Error(e) => {
            if e.stack_frames.is_empty() {
                e.message
            } else {
                format!("{}\n{}", e.message, e.traceback())
            }
        }
        ControlFlow::Yield(_) => "attempt to yield from outside a coroutine".to_string(),
    }
}

fn require_module(_interp: &mut Interpreter, module: &str) -> Result<(), String> {
    Err(format!("module loading is not supported ('{module}' requested via -l)"))
}

fn execute_file(interp: &mut Interpreter, filename: &str) -> Result<(), String> {
    let code = fs::read_to_string(filename).map_err(|e| format!("cannot open {}: {}", filename, e))?;
    interp.call_main(&code, filename).map(|_| ()).map_err(render_uncaught)
}

fn execute_stdin(interp: &mut Interpreter) -> Result<(), String> {
    let mut code = String::new();
    io::stdin().read_to_string(&mut code).map_err(|e| format!("error reading stdin: {}", e))?;
    interp.call_main(&code, "stdin").map(|_| ()).map_err(render_uncaught)
}

fn run_repl(interp: &mut Interpreter) {
    println!("{}", VERSION);
    println!("{}", COPYRIGHT);
    println!("Type Ctrl+C or Ctrl+Z to exit\n");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut incomplete = String::new();

    loop {
        if incomplete.is_empty() {
            print!("> ");
        } else {
            print!(">> ");
        }
        io::stdout().flush().unwrap();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(_)) | None => break,
        };

        let trimmed = line.trim();
        if incomplete.is_empty() && (trimmed == "exit" || trimmed == "quit") {
            break;
        }

        if !incomplete.is_empty() {
            incomplete.push('\n');
        }
        incomplete.push_str(&line);

        let expr_code = format!("return {}", incomplete);
        let try_expr = interp.compile(&expr_code, "stdin");

        let code_to_run = if try_expr.is_ok() { expr_code } else { incomplete.clone() };

        match interp.compile(&code_to_run, "stdin") {
            Ok(proto) => {
                let closure = std::rc::Rc::new(lua54::value::LuaClosure::new(proto, Vec::new()));
                let main = interp.main_coroutine.clone();
                match interp.call_closure_on(&main, closure, Vec::new()) {
                    Ok(results) => {
                        if let Some(first) = results.into_iter().next() {
                            if !first.is_nil() {
                                match lua54::stdlib::tostring_value(interp, &first) {
                                    Ok(s) => println!("{}", s),
                                    Err(e) => eprintln!("{}", render_uncaught(e)),
                                }
                            }
                        }
                        incomplete.clear();
                    }
                    Err(e) => {
                        eprintln!("{}", render_uncaught(e));
                        incomplete.clear();
                    }
                }
            }
            Err(e) => {
                let msg = e.message.clone();
                if e.kind == ErrorKind::SyntaxError && (msg.contains("<eof>") || msg.contains("expected")) {
                    continue;
                } else {
                    eprintln!("{}", msg);
                    incomplete.clear();
                }
            }
        }
    }
}

fn main() {
    // Deep pcall recursion needs more native stack than the default thread gives.
    let stack_size = 16 * 1024 * 1024;
    let builder = std::thread::Builder::new().name("lua-main".into()).stack_size(stack_size);

    let handler = builder.spawn(lua_main).expect("failed to spawn lua-main thread");

    match handler.join() {
        Ok(code) => std::process::exit(code),
        Err(_) => {
            eprintln!("lua54: internal error (thread panicked)");
            std::process::exit(1);
        }
    }
}

fn lua_main() -> i32 {
    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("lua54: {}", e);
            print_usage();
            return 1;
        }
    };

    if opts.show_version {
        print_version();
        if opts.execute_strings.is_empty() && opts.script_file.is_none() && !opts.read_stdin {
            return 0;
        }
    }

    let mut interp = Interpreter::new();
    lua54::stdlib::register_all(&mut interp);
    if cfg!(debug_assertions) {
        interp.set_global("DEBUG", Value::Bool(true));
    }

    if !opts.ignore_env {
        if let Some(init) = env::var("LUA_INIT_5_4").ok().or_else(|| env::var("LUA_INIT").ok()) {
            let result = if let Some(filename) = init.strip_prefix('@') {
                execute_file(&mut interp, filename)
            } else {
                interp.call_main(&init, "=(command line)").map(|_| ()).map_err(render_uncaught)
            };
            if let Err(e) = result {
                eprintln!("lua54: {}", e);
                return 1;
            }
        }
    }

    if opts.warnings_on {
        eprintln!("lua54: warning subsystem not implemented, -W is a no-op");
    }

    let exe_path = env::args().next().unwrap_or_else(|| "lua54".to_string());
    setup_arg_table(&mut interp, &exe_path, opts.script_file.as_deref(), &opts.script_args);

    for module in &opts.require_modules {
        if let Err(e) = require_module(&mut interp, module) {
            eprintln!("lua54: {}", e);
            return 1;
        }
    }

    for code in &opts.execute_strings {
        if let Err(e) = interp.call_main(code, "=(command line)") {
            eprintln!("lua54: {}", render_uncaught(e));
            return 1;
        }
    }

    if let Some(filename) = &opts.script_file {
        if let Err(e) = execute_file(&mut interp, filename) {
            eprintln!("lua54: {}", e);
            return 1;
        }
    } else if opts.read_stdin {
        if let Err(e) = execute_stdin(&mut interp) {
            eprintln!("lua54: {}", e);
            return 1;
        }
    }

    if opts.interactive || (opts.execute_strings.is_empty() && opts.script_file.is_none() && !opts.read_stdin) {
        run_repl(&mut interp);
    }

    0
}
