use gridpulse_core::Config;

pub fn run(config: &Config) {
    match serde_json::to_string_pretty(config) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: cannot render configuration: {e}");
            std::process::exit(1);
        }
    }
}
