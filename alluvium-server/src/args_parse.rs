use anyhow::Result;
use std::env;

pub(crate) struct Args {
    pub(crate) config_file: String,
    pub(crate) node_id: Option<String>,
    pub(crate) hostname: Option<String>,
    pub(crate) store_addr: Option<String>,
    pub(crate) prom_exporter: Option<String>,
}

impl Args {
    fn show_usage() {
        println!("Alluvium Node Usage:");
        println!("  --config-file        Path to config file (required)");
        println!("  --node-id            Numeric node identity (overrides config)");
        println!("  --hostname           Hostname used for locality decisions (overrides config)");
        println!("  --store-addr         Coordination store (etcd) address (overrides config)");
        println!("  --prom-exporter      Prometheus Exporter http address");
    }
    pub(crate) fn parse() -> Result<Self> {
        let args: Vec<String> = env::args().collect();

        if args.len() <= 1 {
            Self::show_usage();
            return Err(anyhow::anyhow!("No arguments provided"));
        }

        let mut config_file = None;
        let mut node_id = None;
        let mut hostname = None;
        let mut store_addr = None;
        let mut prom_exporter = None;

        let mut args_iter = args.iter().skip(1);
        while let Some(arg) = args_iter.next() {
            match arg.as_str() {
                "--config-file" => {
                    config_file = args_iter.next().map(|s| s.to_string());
                }
                "--node-id" => {
                    node_id = args_iter.next().map(|s| s.to_string());
                }
                "--hostname" => {
                    hostname = args_iter.next().map(|s| s.to_string());
                }
                "--store-addr" => {
                    store_addr = args_iter.next().map(|s| s.to_string());
                }
                "--prom-exporter" => {
                    prom_exporter = args_iter.next().map(|s| s.to_string());
                }
                _ => return Err(anyhow::anyhow!("Unknown argument: {}", arg)),
            }
        }

        Ok(Args {
            config_file: config_file
                .ok_or_else(|| anyhow::anyhow!("Missing required --config-file"))?,
            node_id,
            hostname,
            store_addr,
            prom_exporter,
        })
    }
}
