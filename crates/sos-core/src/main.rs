//! Sensor Observation Ingest CLI
//!
//! Registers result templates, ingests encoded results and reads them back
//! against a configured storage backend.

use clap::{Args, Parser, Subcommand};
use sos_common::error::format_error_human;
use sos_common::{Error, OutputFormat, StructuredError, SCHEMA_VERSION};
use sos_config::StorageBackend;
use sos_core::config::{load_config, ConfigOptions, ResolvedConfig};
use sos_core::exit_codes::ExitCode;
use sos_core::logging::{
    event_names, init_logging, LogConfig, LogContext, LogFormat, LogLevel, Stage,
};
use sos_core::model::{FeatureDescriptor, ResultTemplate};
use sos_core::request::{GetResultRequest, InsertResultRequest, RegisterTemplateRequest};
use sos_core::schema::{available_schemas, generate_all_schemas, generate_schema};
use sos_core::store::{Database, MemoryDatabase};
use sos_core::{log_event, SosService};
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};

/// Sensor Observation Ingest - result templates and bulk result insertion
#[derive(Parser)]
#[command(name = "sos-ingest")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Settings file (service.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file; overrides the configured storage
    #[arg(long, global = true, env = "SOS_INGEST_DB")]
    db: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    /// Log level (overrides SOS_LOG)
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    /// Log format (overrides SOS_LOG_FORMAT)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a result template from a JSON request document
    RegisterTemplate(RegisterTemplateArgs),

    /// Decode and store an encoded result against a template
    InsertResult(InsertResultArgs),

    /// Show a registered template
    GetTemplate(GetTemplateArgs),

    /// Re-encode the stored observations of a template
    GetResult(GetResultArgs),

    /// List registered templates
    ListTemplates,

    /// Register a procedure for an offering
    RegisterProcedure(RegisterProcedureArgs),

    /// Declare a related feature for an offering
    DeclareRelatedFeature(DeclareRelatedFeatureArgs),

    /// Print JSON Schema of request and response documents
    Schema(SchemaArgs),

    /// Validate configuration and storage
    Check,

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct RegisterTemplateArgs {
    /// Request document path, or '-' for stdin
    #[arg(long)]
    request: PathBuf,
}

#[derive(Args, Debug)]
struct InsertResultArgs {
    /// Template identifier
    #[arg(long)]
    template: String,

    /// Encoded result values
    #[arg(long, conflicts_with = "values_file", required_unless_present = "values_file")]
    values: Option<String>,

    /// File holding the encoded result values
    #[arg(long)]
    values_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GetTemplateArgs {
    /// Template identifier
    #[arg(long, conflicts_with_all = ["offering", "observed_property"])]
    id: Option<String>,

    #[arg(long, requires = "observed_property")]
    offering: Option<String>,

    #[arg(long, requires = "offering")]
    observed_property: Option<String>,
}

#[derive(Args, Debug)]
struct GetResultArgs {
    /// Template identifier
    #[arg(long)]
    template: String,

    /// Only observations whose phenomenon time ends at or after this instant
    #[arg(long)]
    from: Option<String>,

    /// Only observations whose phenomenon time starts at or before this instant
    #[arg(long)]
    to: Option<String>,
}

#[derive(Args, Debug)]
struct RegisterProcedureArgs {
    #[arg(long)]
    procedure: String,

    #[arg(long)]
    offering: String,
}

#[derive(Args, Debug)]
struct DeclareRelatedFeatureArgs {
    #[arg(long)]
    offering: String,

    /// Identifier of the related feature
    #[arg(long)]
    feature: String,

    /// Role of the relation (e.g. "parent")
    #[arg(long)]
    role: Option<String>,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Type to print
    type_name: Option<String>,

    /// List available types
    #[arg(long, conflicts_with = "all")]
    list: bool,

    /// Print every schema
    #[arg(long)]
    all: bool,
}

/// Rendered command output.
struct Output {
    command: &'static str,
    json: serde_json::Value,
    summary: String,
    markdown: String,
}

fn main() {
    let cli = Cli::parse();

    let cli_level = if cli.global.quiet {
        Some(LogLevel::Error)
    } else {
        match cli.global.verbose {
            0 => cli.global.log_level,
            1 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    };
    init_logging(&LogConfig::from_env(cli_level, cli.global.log_format));

    let log = LogContext::for_run();
    log_event!(
        log,
        DEBUG,
        event_names::RUN_STARTED,
        Stage::Init,
        "sos-ingest starting",
        version = env!("CARGO_PKG_VERSION")
    );

    let exit_code = match &cli.command {
        Commands::Version => print_version(&cli.global),
        Commands::Schema(args) => run_schema(&cli.global, &log, args),
        Commands::Check => run_check(&cli.global, &log),
        command => match resolve(&cli.global, &log) {
            Ok(resolved) => run_with_backend(&cli.global, &log, &resolved, command),
            Err(e) => output_error(&cli.global, &log, &e),
        },
    };

    std::process::exit(exit_code.as_i32());
}

fn resolve(global: &GlobalOpts, log: &LogContext) -> Result<ResolvedConfig, Error> {
    let options = ConfigOptions {
        config_path: global.config.clone(),
        db_path: global.db.clone(),
    };
    let resolved = load_config(&options)?;
    log_event!(
        log,
        DEBUG,
        event_names::CONFIG_LOADED,
        Stage::Init,
        format!("settings from {}", resolved.source),
        backend = tracing::field::display(&resolved.settings.storage.backend)
    );
    Ok(resolved)
}

fn run_with_backend(
    global: &GlobalOpts,
    log: &LogContext,
    resolved: &ResolvedConfig,
    command: &Commands,
) -> ExitCode {
    let settings = &resolved.settings;
    let result = match settings.storage.backend {
        StorageBackend::Sqlite => resolved.open_sqlite().map_err(Error::from).and_then(|db| {
            let service = SosService::new(db, settings).with_log_context(log.clone());
            run_command(&service, command)
        }),
        StorageBackend::Memory => {
            let service =
                SosService::new(MemoryDatabase::new(), settings).with_log_context(log.clone());
            run_command(&service, command)
        }
    };
    match result {
        Ok(output) => {
            print_output(global, &output);
            ExitCode::Success
        }
        Err(e) => output_error(global, log, &e),
    }
}

fn run_command<D: Database>(service: &SosService<D>, command: &Commands) -> Result<Output, Error> {
    match command {
        Commands::RegisterTemplate(args) => register_template(service, args),
        Commands::InsertResult(args) => insert_result(service, args),
        Commands::GetTemplate(args) => get_template(service, args),
        Commands::GetResult(args) => get_result(service, args),
        Commands::ListTemplates => list_templates(service),
        Commands::RegisterProcedure(args) => {
            let created = service.register_procedure(&args.procedure, &args.offering)?;
            Ok(Output {
                command: "register-procedure",
                json: serde_json::json!({
                    "procedure": args.procedure,
                    "offering": args.offering,
                    "created": created,
                }),
                summary: format!(
                    "procedure {} {} for offering {}",
                    args.procedure,
                    if created { "registered" } else { "already registered" },
                    args.offering
                ),
                markdown: format!(
                    "# Procedure\n\n- procedure: `{}`\n- offering: `{}`\n- created: {}\n",
                    args.procedure, args.offering, created
                ),
            })
        }
        Commands::DeclareRelatedFeature(args) => {
            let feature = FeatureDescriptor::new(args.feature.clone());
            let created =
                service.declare_related_feature(&args.offering, &feature, args.role.as_deref())?;
            Ok(Output {
                command: "declare-related-feature",
                json: serde_json::json!({
                    "offering": args.offering,
                    "feature": args.feature,
                    "role": args.role,
                    "created": created,
                }),
                summary: format!(
                    "related feature {} {} for offering {}",
                    args.feature,
                    if created { "declared" } else { "already declared" },
                    args.offering
                ),
                markdown: format!(
                    "# Related Feature\n\n- offering: `{}`\n- feature: `{}`\n- created: {}\n",
                    args.offering, args.feature, created
                ),
            })
        }
        Commands::Schema(_) | Commands::Check | Commands::Version => {
            Err(Error::invalid("command", "does not use storage"))
        }
    }
}

fn read_input(path: &Path) -> Result<String, Error> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}

fn register_template<D: Database>(
    service: &SosService<D>,
    args: &RegisterTemplateArgs,
) -> Result<Output, Error> {
    let request = RegisterTemplateRequest::from_json(&read_input(&args.request)?)?;
    let response = service.register_template(request)?;
    Ok(Output {
        command: "register-template",
        json: serde_json::to_value(&response)?,
        summary: format!(
            "template {} accepted ({} constellation)",
            response.accepted_template, response.constellation
        ),
        markdown: format!(
            "# Template Registered\n\n- identifier: `{}`\n- offering: `{}`\n- observed property: `{}`\n- procedure: `{}`\n- observation type: {}\n- constellation: {}\n- related links: {}\n",
            response.accepted_template,
            response.offering,
            response.observed_property,
            response.procedure,
            response.observation_type,
            response.constellation,
            response.related_links
        ),
    })
}

fn insert_result<D: Database>(
    service: &SosService<D>,
    args: &InsertResultArgs,
) -> Result<Output, Error> {
    let values = match (&args.values, &args.values_file) {
        (Some(values), _) => values.clone(),
        (None, Some(path)) => read_input(path)?
            .trim_end_matches(['\n', '\r'])
            .to_string(),
        (None, None) => return Err(Error::MissingParameter("resultValues".to_string())),
    };
    let summary = service.insert_result(&InsertResultRequest::new(&args.template, values))?;
    Ok(Output {
        command: "insert-result",
        json: serde_json::to_value(&summary)?,
        summary: format!(
            "{}: {} observations from {} rows, {} flushes",
            summary.template, summary.observations_persisted, summary.rows_decoded, summary.flushes
        ),
        markdown: format!(
            "# Result Inserted\n\n- template: `{}`\n- rows decoded: {}\n- observations persisted: {}\n- flushes: {}\n- constellation: {}\n",
            summary.template,
            summary.rows_decoded,
            summary.observations_persisted,
            summary.flushes,
            summary.constellation.label()
        ),
    })
}

fn template_markdown(template: &ResultTemplate) -> String {
    let mut md = format!("## `{}`\n\n", template.identifier);
    let key = &template.constellation.key;
    md.push_str(&format!("- offering: `{}`\n", key.offering));
    md.push_str(&format!("- observed property: `{}`\n", key.observed_property));
    md.push_str(&format!("- procedure: `{}`\n", key.procedure));
    md.push_str(&format!(
        "- observation type: {}\n",
        template.constellation.observation_type
    ));
    md.push_str(&format!(
        "- feature of interest: `{}`\n",
        template.feature_of_interest.identifier
    ));
    md.push_str(&format!(
        "- separators: token `{}`, block `{}`\n\n",
        template.result_encoding.token_separator, template.result_encoding.block_separator
    ));
    md.push_str("| # | name | kind | definition | unit |\n|---|---|---|---|---|\n");
    for (i, field) in template.result_structure.fields.iter().enumerate() {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            i,
            field.name,
            field.kind.name(),
            field.definition,
            field.unit.as_deref().unwrap_or("")
        ));
    }
    md
}

fn get_template<D: Database>(
    service: &SosService<D>,
    args: &GetTemplateArgs,
) -> Result<Output, Error> {
    let template = match (&args.id, &args.offering, &args.observed_property) {
        (Some(id), _, _) => service.get_result_template(id)?,
        (None, Some(offering), Some(property)) => {
            service.get_result_template_for(offering, property)?
        }
        _ => return Err(Error::MissingParameter("id".to_string())),
    };
    Ok(Output {
        command: "get-template",
        json: serde_json::to_value(&template)?,
        summary: format!(
            "{} {} {}",
            template.identifier,
            template.constellation.key,
            template.constellation.observation_type
        ),
        markdown: format!("# Result Template\n\n{}", template_markdown(&template)),
    })
}

fn get_result<D: Database>(service: &SosService<D>, args: &GetResultArgs) -> Result<Output, Error> {
    let response = service.get_result(&GetResultRequest {
        template: args.template.clone(),
        from: args.from.clone(),
        to: args.to.clone(),
    })?;
    Ok(Output {
        command: "get-result",
        json: serde_json::to_value(&response)?,
        summary: response.result_values.clone(),
        markdown: format!(
            "# Result\n\n- template: `{}`\n- rows: {}\n\n```\n{}\n```\n",
            response.template, response.rows, response.result_values
        ),
    })
}

fn list_templates<D: Database>(service: &SosService<D>) -> Result<Output, Error> {
    let templates = service.list_templates()?;
    let mut markdown = format!("# Result Templates ({})\n\n", templates.len());
    for template in &templates {
        markdown.push_str(&template_markdown(template));
        markdown.push('\n');
    }
    Ok(Output {
        command: "list-templates",
        json: serde_json::json!({
            "count": templates.len(),
            "templates": templates,
        }),
        summary: format!("{} templates", templates.len()),
        markdown,
    })
}

fn run_schema(global: &GlobalOpts, log: &LogContext, args: &SchemaArgs) -> ExitCode {
    if args.list || (args.type_name.is_none() && !args.all) {
        let types = available_schemas();
        match global.format {
            OutputFormat::Json => {
                let listing: Vec<_> = types
                    .iter()
                    .map(|(name, desc)| serde_json::json!({"name": name, "description": desc}))
                    .collect();
                print_json(&serde_json::json!({ "schemas": listing }));
            }
            _ => {
                for (name, desc) in types {
                    println!("{:<26} {}", name, desc);
                }
            }
        }
        return ExitCode::Success;
    }

    if args.all {
        print_json(&serde_json::to_value(generate_all_schemas()).unwrap_or_default());
        return ExitCode::Success;
    }

    let name = args.type_name.as_deref().unwrap_or_default();
    match generate_schema(name) {
        Some(schema) => {
            print_json(&schema);
            ExitCode::Success
        }
        None => output_error(
            global,
            log,
            &Error::invalid("type", format!("unknown schema type '{}'", name)),
        ),
    }
}

fn run_check(global: &GlobalOpts, log: &LogContext) -> ExitCode {
    let mut checks: Vec<serde_json::Value> = Vec::new();
    let mut all_ok = true;

    match resolve(global, log) {
        Ok(resolved) => {
            checks.push(serde_json::json!({
                "check": "config",
                "status": "ok",
                "snapshot": resolved.snapshot(),
            }));
            let storage = match resolved.settings.storage.backend {
                StorageBackend::Memory => Ok("memory".to_string()),
                StorageBackend::Sqlite => resolved
                    .open_sqlite()
                    .map(|db| db.path().display().to_string()),
            };
            match storage {
                Ok(target) => checks.push(serde_json::json!({
                    "check": "storage",
                    "status": "ok",
                    "target": target,
                })),
                Err(e) => {
                    all_ok = false;
                    checks.push(serde_json::json!({
                        "check": "storage",
                        "status": "error",
                        "error": e.to_string(),
                    }));
                }
            }
        }
        Err(e) => {
            all_ok = false;
            checks.push(serde_json::json!({
                "check": "config",
                "status": "error",
                "error": e.to_string(),
            }));
        }
    }

    let mut markdown = String::from("# sos-ingest check\n\n");
    for check in &checks {
        let name = check.get("check").and_then(|v| v.as_str()).unwrap_or("?");
        let status = check.get("status").and_then(|v| v.as_str()).unwrap_or("?");
        let symbol = if status == "ok" { "✓" } else { "✗" };
        markdown.push_str(&format!("{} {}: {}\n", symbol, name, status));
        if let Some(error) = check.get("error").and_then(|v| v.as_str()) {
            markdown.push_str(&format!("  Error: {}\n", error));
        }
    }

    print_output(
        global,
        &Output {
            command: "check",
            json: serde_json::json!({
                "status": if all_ok { "ok" } else { "error" },
                "checks": checks,
            }),
            summary: format!("check: {}", if all_ok { "OK" } else { "FAILED" }),
            markdown,
        },
    );

    if all_ok {
        ExitCode::Success
    } else {
        ExitCode::ConfigError
    }
}

fn print_version(global: &GlobalOpts) -> ExitCode {
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "sos_ingest_version": env!("CARGO_PKG_VERSION"),
        })),
        _ => {
            println!("sos-ingest {}", env!("CARGO_PKG_VERSION"));
            println!("schema version: {}", SCHEMA_VERSION);
        }
    }
    ExitCode::Success
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", value),
    }
}

fn print_output(global: &GlobalOpts, output: &Output) {
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "command": output.command,
            "status": "ok",
            "result": output.json,
        })),
        OutputFormat::Summary => println!("[OK] {}: {}", output.command, output.summary),
        OutputFormat::Md => print!("{}", output.markdown),
    }
}

fn output_error(global: &GlobalOpts, log: &LogContext, error: &Error) -> ExitCode {
    let exit_code = ExitCode::from(error);
    log_event!(
        log,
        DEBUG,
        event_names::RUN_FINISHED,
        Stage::Init,
        format!("exiting with {}", exit_code)
    );

    match global.format {
        OutputFormat::Json => {
            let response = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "status": "error",
                "exit_code": exit_code.code_name(),
                "error": StructuredError::from(error),
            });
            match serde_json::to_string_pretty(&response) {
                Ok(text) => eprintln!("{}", text),
                Err(_) => eprintln!("{}", StructuredError::from(error).to_json()),
            }
        }
        OutputFormat::Summary => eprintln!("[{}] {}", exit_code.code_name(), error),
        OutputFormat::Md => {
            let use_color = !global.no_color && std::io::stderr().is_terminal();
            eprintln!("{}", format_error_human(error, use_color));
        }
    }

    exit_code
}
