use std::fs;
use widetable::catalog::schema::{ResolvedSchema, TableSchema};
use widetable::config::WideTableConfig;
use widetable::derive_namespace;
use widetable::query::ddl::plan_create;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Err("missing command".into());
    }
    match args[1].as_str() {
        "keyspace" => cmd_keyspace(&args[2..]),
        "ddl" => cmd_ddl(&args[2..]),
        "index-schema" => cmd_index_schema(&args[2..]),
        other => {
            print_usage();
            Err(format!("unknown command: {other}"))
        }
    }
}

fn cmd_keyspace(args: &[String]) -> Result<(), String> {
    let [domain, table, ..] = args else {
        return Err("keyspace requires <domain> <table>".into());
    };
    println!("{}", derive_namespace(domain, table));
    Ok(())
}

fn cmd_ddl(args: &[String]) -> Result<(), String> {
    let domain = parse_flag_value(args, "--domain").ok_or("--domain is required")?;
    let schema = load_schema(args)?;
    let config = if args.iter().any(|a| a == "--single-node") {
        WideTableConfig::single_node()
    } else {
        WideTableConfig::default()
    };
    let keyspace = derive_namespace(&domain, &schema.table);
    let plan = plan_create(&keyspace, &schema, &config.replication).map_err(|e| e.to_string())?;

    println!("{};", plan.keyspace.cql());
    for table in &plan.tables {
        println!("{};", table.cql());
    }
    println!("{};", plan.schema_row.cql());
    Ok(())
}

fn cmd_index_schema(args: &[String]) -> Result<(), String> {
    let schema = load_schema(args)?;
    let resolved = ResolvedSchema::resolve("", schema).map_err(|e| e.to_string())?;
    let tables = match parse_flag_value(args, "--index") {
        Some(name) => vec![resolved.index(&name).map_err(|e| e.to_string())?],
        None => resolved.indexes.values().collect(),
    };
    for table in tables {
        let rendered = serde_json::to_string_pretty(table)
            .map_err(|e| format!("encode {}: {e}", table.name))?;
        println!("{rendered}");
    }
    Ok(())
}

fn load_schema(args: &[String]) -> Result<TableSchema, String> {
    let path = parse_flag_value(args, "--schema").ok_or("--schema is required")?;
    let raw = fs::read_to_string(&path).map_err(|e| format!("read {path}: {e}"))?;
    let value = serde_json::from_str(&raw).map_err(|e| format!("parse {path}: {e}"))?;
    TableSchema::from_json(value).map_err(|e| format!("{path}: {e}"))
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|idx| args.get(idx + 1).cloned())
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!("  widetable keyspace <domain> <table>");
    eprintln!("  widetable ddl --domain <domain> --schema <schema.json> [--single-node]");
    eprintln!("  widetable index-schema --schema <schema.json> [--index <name>]");
}
