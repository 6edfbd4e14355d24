use lua54::stdlib::raw_tostring;
use lua54::value::Proto;
use lua54::vm::instruction::{a_of, b_of, c_of, opcode_of, sbx_of};
use lua54::vm::opcode::OpCode;
use lua54::Interpreter;
use std::env;
use std::fs;

fn main() {
    let args: Vec<String> = env::args().collect();

    let (source, filename) = if args.len() > 1 {
        let filename = args[1].clone();
        match fs::read_to_string(&filename) {
            Ok(content) => (content, filename),
            Err(e) => {
                eprintln!("Error reading file '{}': {}", filename, e);
                std::process::exit(1);
            }
        }
    } else {
        println!("Usage: bytecode_dump <source_file.lua>");
        std::process::exit(0);
    };

    let mut interp = Interpreter::new();
    match interp.compile(&source, &filename) {
        Ok(proto) => dump_proto(&proto, &filename, true),
        Err(e) => {
            eprintln!("{}: {}", filename, e.message);
            std::process::exit(1);
        }
    }
}

fn format_constant(v: &lua54::Value) -> String {
    match v {
        lua54::Value::Str(s) => {
            let content = s.as_str();
            let mut escaped = String::new();
            for ch in content.chars() {
                match ch {
                    '\\' => escaped.push_str("\\\\"),
                    '\n' => escaped.push_str("\\n"),
                    '\r' => escaped.push_str("\\r"),
                    '\t' => escaped.push_str("\\t"),
                    '"' => escaped.push_str("\\\""),
                    '\0' => escaped.push_str("\\000"),
                    c if c.is_control() => escaped.push_str(&format!("\\{:03}", c as u8)),
                    c => escaped.push(c),
                }
            }
            let char_count = escaped.chars().count();
            if char_count > 64 {
                let truncated: String = escaped.chars().take(64).collect();
                format!("\"{} ...\"", truncated)
            } else {
                format!("\"{}\"", escaped)
            }
        }
        other => raw_tostring(other),
    }
}

/// Line for the instruction at `pc`, from the last line event at or before it.
fn line_for_pc(proto: &Proto, pc: u32) -> u32 {
    let mut line = proto.line_defined;
    for event in &proto.line_events {
        if event.pc > pc {
            break;
        }
        line = event.line;
    }
    line
}

fn dump_proto(proto: &Proto, filename: &str, is_main: bool) {
    let func_name = if is_main {
        format!("main <{}:0,0>", filename)
    } else {
        format!("function <{}:{},{}>", filename, proto.line_defined, proto.last_line_defined)
    };

    let ninstr = proto.instructions.len();
    let param_str = if proto.is_vararg {
        format!("{}+", proto.num_params)
    } else {
        format!("{}", proto.num_params)
    };

    println!("\n{} ({} instructions)", func_name, ninstr);
    println!(
        "{} params, {} slots, {} upvalue{}, {} local{}, {} constant{}, {} function{}",
        param_str,
        proto.max_stack_size,
        proto.upvalues.len(),
        if proto.upvalues.len() != 1 { "s" } else { "" },
        proto.locals.len(),
        if proto.locals.len() != 1 { "s" } else { "" },
        proto.constants.len(),
        if proto.constants.len() != 1 { "s" } else { "" },
        proto.nested.len(),
        if proto.nested.len() != 1 { "s" } else { "" },
    );

    for (pc, &word) in proto.instructions.iter().enumerate() {
        let op = OpCode::from_u8(opcode_of(word));
        let a = a_of(word);
        let b = b_of(word);
        let c = c_of(word);
        let sbx = sbx_of(word);
        let line = line_for_pc(proto, pc as u32);

        let Some(op) = op else {
            println!("\t{}\t[{}]\t{:<9}\t(unknown opcode)", pc + 1, line, "???");
            continue;
        };

        let (args, comment) = match op {
            OpCode::Move | OpCode::GetUpval | OpCode::SetUpval | OpCode::Unm | OpCode::Bnot | OpCode::Not | OpCode::Len => {
                (format!("{} {}", a, b), String::new())
            }
            OpCode::LoadK => (format!("{} {}", a, b), format!(" ; {}", proto.constants.get(b as usize).map(format_constant).unwrap_or_default())),
            OpCode::LoadI | OpCode::LoadBool => (format!("{} {}", a, b), String::new()),
            OpCode::LoadNil => (format!("{} {}", a, b), format!(" ; {} out", b + 1)),
            OpCode::GetGlobal | OpCode::SetGlobal => (format!("{} {}", a, b), format!(" ; {}", proto.constants.get(b as usize).map(format_constant).unwrap_or_default())),
            OpCode::Jmp => (format!("{}", sbx), format!(" ; to {}", (pc as i64 + sbx as i64 + 2))),
            OpCode::ForPrep | OpCode::ForLoop | OpCode::TForLoop => (format!("{} {}", a, sbx), format!(" ; to {}", (pc as i64 + sbx as i64 + 2))),
            OpCode::Call | OpCode::TailCall => {
                let params = if b == 0 { "all in".to_string() } else { format!("{} in", b - 1) };
                let returns = if c == 0 { "all out".to_string() } else { format!("{} out", c - 1) };
                (format!("{} {} {}", a, b, c), format!(" ; {} {}", params, returns))
            }
            OpCode::Return => {
                let nret = if b == 0 { "all out".to_string() } else { format!("{} out", b.saturating_sub(1)) };
                (format!("{} {}", a, b), format!(" ; {}", nret))
            }
            OpCode::Closure => (
                format!("{} {}", a, b),
                proto.nested.get(b as usize).map(|p| format!(" ; function <{}:{},{}>", p.source, p.line_defined, p.last_line_defined)).unwrap_or_default(),
            ),
            OpCode::TForCall => (format!("{} {}", a, c), String::new()),
            _ => (format!("{} {} {}", a, b, c), String::new()),
        };

        println!("\t{}\t[{}]\t{:<9}\t{}{}", pc + 1, line, op.mnemonic(), args, comment);
    }

    if !proto.constants.is_empty() {
        println!("constants ({}) for {}:", proto.constants.len(), func_name);
        for (idx, v) in proto.constants.iter().enumerate() {
            println!("\t{}\t{}", idx, format_constant(v));
        }
    }

    std::io::Write::flush(&mut std::io::stdout()).ok();

    for child in &proto.nested {
        dump_proto(child, filename, false);
    }
    println!();
}
