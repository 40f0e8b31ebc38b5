use super::EXIT_SUCCESS;
use clap::CommandFactory;
use clap_complete::{generate, Shell};

pub fn run<C: CommandFactory>(shell: Shell) -> Result<u8, String> {
    generate(shell, &mut C::command(), "uncork", &mut std::io::stdout());
    Ok(EXIT_SUCCESS)
}
