use cu::pre::*;
use embercc_front::{Parser, RecordingSink, Session, emit_declarations, lex};
use embercc_sema::Node;

use crate::config::Config;

#[derive(clap::Parser, AsRef)]
pub struct CmdMain {
    /// TOML config file
    #[clap(short = 'C', long)]
    pub config: Option<String>,

    #[clap(subcommand)]
    #[as_ref(cu::cli::Flags)]
    pub cmd: CmdSubcommand,
}

#[derive(clap::Subcommand)]
pub enum CmdSubcommand {
    Compile(CmdCompile),
    Dump(CmdDump),
}

impl AsRef<cu::cli::Flags> for CmdSubcommand {
    fn as_ref(&self) -> &cu::cli::Flags {
        match self {
            Self::Compile(cmd) => cmd.as_ref(),
            Self::Dump(cmd) => cmd.as_ref(),
        }
    }
}

/// Run the front-end over one source file and print the stage summary
#[derive(Debug, clap::Parser, AsRef)]
pub struct CmdCompile {
    /// C++ source file
    pub file: String,

    #[clap(flatten)]
    #[as_ref]
    pub common: cu::cli::Flags,
}

/// Compile and dump instantiated types and mangled symbols
#[derive(Debug, clap::Parser, AsRef)]
pub struct CmdDump {
    /// C++ source file
    pub file: String,

    /// Only show symbols matching this pattern
    #[clap(long)]
    pub filter: Option<String>,

    /// Machine-readable output
    #[clap(long)]
    pub json: bool,

    #[clap(flatten)]
    #[as_ref]
    pub common: cu::cli::Flags,
}

pub fn main(args: CmdMain) -> cu::Result<bool> {
    let config = Config::load(args.config.as_deref())?;
    match args.cmd {
        CmdSubcommand::Compile(cmd) => {
            let sess = run_front(&config, &cmd.file)?;
            print_summary(&sess);
            print_diagnostics(&sess);
            Ok(!sess.diags.has_errors())
        }
        CmdSubcommand::Dump(cmd) => {
            let sess = run_front(&config, &cmd.file)?;
            dump(&sess, cmd.filter.as_deref(), cmd.json)?;
            print_diagnostics(&sess);
            Ok(!sess.diags.has_errors())
        }
    }
}

fn run_front(config: &Config, file: &str) -> cu::Result<Session> {
    let source = cu::check!(
        cu::fs::read_string(file),
        "failed to read source file {file}"
    )?;
    let tokens = cu::check!(lex(&source, 0), "failed to lex {file}")?;
    let mut sess = Session::new(config.to_options());
    let mut parser = Parser::new(&mut sess, tokens);
    parser.parse_translation_unit()?;
    drop(parser);
    Ok(sess)
}

/// Aligned counts of what the front-end produced
fn print_summary(sess: &Session) {
    use std::fmt::Write as _;

    let mut structs = 0usize;
    let mut funcs = 0usize;
    let mut vars = 0usize;
    for id in &sess.top_level {
        match sess.nodes.get(*id) {
            Some(Node::Struct(_)) => structs += 1,
            Some(Node::Func(_)) => funcs += 1,
            Some(Node::Var(_)) => vars += 1,
            _ => {}
        }
    }
    let (class_insts, instantiations) = sess.types.cache_counts();

    let mut output = String::new();
    let _ = writeln!(output, "=== Front-end summary ===");
    let total = [structs, funcs, vars, class_insts, instantiations, sess.types.len()];
    let digits = (*total.iter().max().unwrap() as f64 + 0.1).log10() as usize + 1;
    let _ = writeln!(output, " Structs: {structs:>digits$} defns");
    let _ = writeln!(output, "   Funcs: {funcs:>digits$} defns");
    let _ = writeln!(output, " Globals: {vars:>digits$} defns");
    let _ = writeln!(
        output,
        "   Insts: {class_insts:>digits$} classes and {instantiations:>digits$} functions"
    );
    let _ = writeln!(output, "   Types: {:>digits$} registered", sess.types.len());
    cu::print!("{output}");
}

fn print_diagnostics(sess: &Session) {
    for d in sess.diags.records() {
        cu::print!("{:?} {}:{}: {}\n", d.severity, d.line, d.col, d.message);
    }
}

fn dump(sess: &Session, filter: Option<&str>, json_out: bool) -> cu::Result<()> {
    let filter = match filter {
        Some(f) => Some(cu::check!(
            regex::Regex::new(f),
            "invalid --filter pattern '{f}'"
        )?),
        None => None,
    };
    let mut sink = RecordingSink::default();
    emit_declarations(sess, &mut sink);

    let symbols: Vec<&embercc_front::FunctionSig> = sink
        .signatures
        .iter()
        .filter(|s| {
            filter
                .as_ref()
                .is_none_or(|f| f.is_match(&s.mangled_name) || f.is_match(&s.name))
        })
        .collect();

    if json_out {
        cu::print!("{}\n", json::stringify_pretty(&symbols)?);
        return Ok(());
    }
    for s in &symbols {
        cu::print!(
            "{} {} ({}) -> {}\n",
            s.mangled_name,
            s.name,
            s.param_types.join(", "),
            s.return_type
        );
    }
    for info in sess.types.iter() {
        if let Some(m) = &info.inst
            && !m.incomplete_instantiation
        {
            let name = sess.view(info.name);
            if filter.as_ref().is_none_or(|f| f.is_match(name)) {
                cu::print!(
                    "type {} size={} align={}\n",
                    name,
                    info.size_bits / 8,
                    info.strukt.as_ref().map(|s| s.alignment).unwrap_or(1)
                );
            }
        }
    }
    Ok(())
}
