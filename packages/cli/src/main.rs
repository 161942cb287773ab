use cu::pre::*;

mod cmds;
mod config;

fn main() -> std::process::ExitCode {
    use clap::Parser as _;
    let args = cmds::CmdMain::parse();
    match cmds::main(args) {
        Ok(true) => std::process::ExitCode::SUCCESS,
        Ok(false) => std::process::ExitCode::FAILURE,
        Err(e) => {
            cu::error!("{e:?}");
            std::process::ExitCode::FAILURE
        }
    }
}
