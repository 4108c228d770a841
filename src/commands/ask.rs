use std::collections::HashMap;
use std::env;
use std::io::{self, Write};
use std::ops::ControlFlow;
use std::path::PathBuf;

use clap::Args;
use serde_json::{Value, json};

use super::{CliError, LogArgs, read_piped_stdin};
use crate::agent::{self, AgentOptions, CommandPolicy, Confirm, TerminalConfirm};
use crate::config::{Cllmfile, ConfigLocations, ConfigMap, DEFAULT_MODEL, merge_config_with_args};
use crate::context::{cli_commands, inject_context, parse_context_commands};
use crate::conversation::{Conversation, ConversationError, ConversationStore, validate_id};
use crate::llm::backend::{ChatBackend, complete_with_fallbacks};
use crate::llm::models::{KNOWN_MODELS, render_model_list};
use crate::llm::openai::CHAT_COMPLETIONS_PATH;
use crate::llm::provider::is_api_key_present;
use crate::llm::tools::image_url_for;
use crate::llm::{
    ChatMessage, CompletionRequest, HttpBackend, ProviderError, RequestOptions, Usage,
};
use crate::logging::{self, LogSettings};
use crate::schema::{
    SchemaError, SchemaLoader, describe_schema, parse_and_validate, response_format,
    select_source,
};
use crate::templates::{
    PromptInputs, TemplateContext, build_template_context, parse_var_assignment,
    render_prompt_template,
};

const NO_PROMPT: &str = "No prompt provided. Use 'cllm --help' for usage.";

#[derive(Debug, Args, Clone, Default)]
pub struct AskArgs {
    #[arg(help = "The prompt to send to the LLM (reads from stdin if not provided)")]
    pub prompt: Option<String>,
    #[arg(short = 'm', long, help = "Model to use (default: gpt-3.5-turbo)")]
    pub model: Option<String>,
    #[arg(short = 't', long, help = "Sampling temperature (0.0 to 2.0)")]
    pub temperature: Option<f64>,
    #[arg(long = "max-tokens", help = "Maximum tokens to generate")]
    pub max_tokens: Option<u32>,
    #[arg(short = 's', long, help = "Stream the response as it's generated")]
    pub stream: bool,
    #[arg(long, help = "Output raw JSON response")]
    pub raw: bool,
    #[arg(short = 'i', long, value_name = "PATH_OR_URL", help = "Attach an image file or URL to the prompt")]
    pub image: Option<String>,
    #[arg(
        short = 'c',
        long,
        value_name = "NAME",
        help = "Use named configuration file (e.g., 'summarize' loads summarize.Cllmfile.yml)"
    )]
    pub config: Option<String>,
    #[arg(long = "cllm-path", value_name = "PATH", help = "Custom .cllm directory")]
    pub cllm_path: Option<PathBuf>,
    #[arg(long = "show-config", help = "Display effective configuration and exit")]
    pub show_config: bool,
    #[arg(long = "list-models", help = "List all available models and exit")]
    pub list_models: bool,
    #[arg(long = "json-schema", value_name = "JSON", help = "Inline JSON schema for structured output")]
    pub json_schema: Option<String>,
    #[arg(
        long = "json-schema-file",
        value_name = "PATH_OR_URL",
        help = "JSON schema file or https:// URL for structured output"
    )]
    pub json_schema_file: Option<String>,
    #[arg(long = "validate-schema", help = "Validate the configured schema and exit")]
    pub validate_schema: bool,
    #[arg(long = "exec", value_name = "CMD", help = "Run CMD and add its output as context (repeatable)")]
    pub exec: Vec<String>,
    #[arg(long = "no-context-exec", help = "Skip context_commands from the Cllmfile")]
    pub no_context_exec: bool,
    #[arg(long = "var", value_name = "KEY=VALUE", help = "Template variable (repeatable)")]
    pub vars: Vec<String>,
    #[arg(long, value_name = "NAME", help = "Render the prompt from <cllm_dir>/templates/NAME.tpl")]
    pub template: Option<String>,
    #[arg(long, value_name = "ID", help = "Continue or create a conversation")]
    pub conversation: Option<String>,
    #[arg(long = "read-only", help = "Use the conversation as context without saving")]
    pub read_only: bool,
    #[arg(long = "conversations-path", value_name = "PATH", help = "Directory for conversation files")]
    pub conversations_path: Option<PathBuf>,
    #[arg(long = "allow-commands", help = "Let the model run validated shell commands")]
    pub allow_commands: bool,
    #[arg(long, help = "Ask before each model-requested command")]
    pub confirm: bool,
    #[arg(short = 'v', long, help = "Echo model-requested commands and output to stderr")]
    pub verbose: bool,
    #[arg(long, value_name = "SECS", help = "Request timeout in seconds")]
    pub timeout: Option<u64>,
    #[arg(long = "num-retries", value_name = "N", help = "Retries on rate limits and server errors")]
    pub num_retries: Option<u32>,
    #[arg(long = "api-base", value_name = "URL", help = "Override the provider base URL")]
    pub api_base: Option<String>,
    #[arg(long = "dry-run", help = "Print the request as JSON without calling the provider")]
    pub dry_run: bool,
}

/// Command execution settings for agent mode.
#[derive(Debug, Clone)]
pub struct AgentPlan {
    pub policy: CommandPolicy,
    pub verbose: bool,
    pub confirm: bool,
}

#[derive(Debug, Clone)]
pub struct ConversationPlan {
    pub store: ConversationStore,
    pub conversation: Conversation,
    pub read_only: bool,
}

/// Everything needed to call the provider, resolved from flags and config.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub request: CompletionRequest,
    pub stream: bool,
    pub raw: bool,
    pub schema: Option<Value>,
    pub fallbacks: Vec<String>,
    pub agent: Option<AgentPlan>,
    pub conversation: Option<ConversationPlan>,
}

/// CLI values that override the Cllmfile. Unset flags are left out.
fn cli_overrides(args: &AskArgs) -> ConfigMap {
    let mut cli = ConfigMap::new();
    if let Some(model) = &args.model {
        cli.insert("model".to_string(), Value::String(model.clone()));
    }
    if let Some(temperature) = args.temperature {
        cli.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = args.max_tokens {
        cli.insert("max_tokens".to_string(), Value::from(max_tokens));
    }
    if args.stream {
        cli.insert("stream".to_string(), Value::Bool(true));
    }
    if args.raw {
        cli.insert("raw_response".to_string(), Value::Bool(true));
    }
    if let Some(timeout) = args.timeout {
        cli.insert("timeout".to_string(), Value::from(timeout));
    }
    if let Some(retries) = args.num_retries {
        cli.insert("num_retries".to_string(), Value::from(retries));
    }
    if let Some(api_base) = &args.api_base {
        cli.insert("api_base".to_string(), Value::String(api_base.clone()));
    }
    cli
}

pub fn effective_config(args: &AskArgs, file_config: &ConfigMap) -> ConfigMap {
    let mut config = merge_config_with_args(file_config, cli_overrides(args));
    config
        .entry("model")
        .or_insert_with(|| Value::String(DEFAULT_MODEL.to_string()));
    config
}

fn write_out(out: &mut dyn Write, text: &str) -> Result<(), CliError> {
    writeln!(out, "{text}").map_err(CliError::io("write output"))
}

fn show_config(
    locations: &ConfigLocations,
    name: Option<&str>,
    config: &ConfigMap,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let mut text = String::from("Configuration sources (in order of precedence):\n");
    let sources = locations.config_sources(name);
    if sources.is_empty() {
        text.push_str("  (no configuration files found)\n");
    }
    for source in sources {
        text.push_str(&format!("  - {source}\n"));
    }
    let rendered = serde_json::to_string_pretty(config)
        .map_err(|err| CliError::Usage(err.to_string()))?;
    text.push_str(&format!("\nEffective configuration:\n{rendered}"));
    write_out(out, &text)
}

fn resolve_prompt(
    args: &AskArgs,
    config: &Cllmfile,
    locations: &ConfigLocations,
    variables: &TemplateContext,
    stdin: Option<String>,
) -> Result<String, CliError> {
    let stdin = stdin
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());
    let prompt_arg = args.prompt.clone().filter(|text| !text.is_empty());

    if let Some(name) = args.template.as_deref().or(config.prompt_template.as_deref()) {
        let inputs = PromptInputs {
            input: prompt_arg,
            stdin,
            ..PromptInputs::default()
        };
        let rendered =
            render_prompt_template(name, &locations.resolve_cllm_dir(), &inputs.into_context(variables))?;
        return Ok(rendered);
    }

    prompt_arg
        .or(stdin)
        .ok_or_else(|| CliError::Usage(NO_PROMPT.to_string()))
}

fn open_conversation(
    args: &AskArgs,
    config: &Cllmfile,
    locations: &ConfigLocations,
) -> Result<Option<ConversationPlan>, CliError> {
    let Some(id) = args.conversation.as_deref() else {
        if args.read_only {
            return Err(ConversationError::ReadOnlyWithoutConversation.into());
        }
        return Ok(None);
    };
    validate_id(id)?;

    let store = ConversationStore::from_env(
        args.conversations_path.as_deref(),
        config.conversations_path.as_deref(),
        locations,
    );
    tracing::debug!(
        dir = %store.dir().display(),
        source = store.source().label(),
        "conversation store"
    );

    let conversation = if store.exists(id) {
        store.load(id)?
    } else if args.read_only {
        return Err(ConversationError::NotFound(id.to_string()).into());
    } else {
        store.create(Some(id), config.model(), config.default_system_message.as_deref())?
    };
    Ok(Some(ConversationPlan {
        store,
        conversation,
        read_only: args.read_only,
    }))
}

/// Resolves prompt, context, schema, conversation and agent settings into a
/// ready-to-send request.
pub async fn prepare(
    args: &AskArgs,
    locations: &ConfigLocations,
    config: &Cllmfile,
    stdin: Option<String>,
    env_vars: &HashMap<String, String>,
) -> Result<Prepared, CliError> {
    let conversation = open_conversation(args, config, locations)?;

    let mut cli_vars = TemplateContext::new();
    for raw in &args.vars {
        let (name, value) = parse_var_assignment(raw)?;
        cli_vars.insert(name, value);
    }
    let variables = build_template_context(&cli_vars, &config.variables, env_vars)?;

    let prompt = resolve_prompt(args, config, locations, &variables, stdin)?;

    let skip_config_context = args.no_context_exec
        || conversation
            .as_ref()
            .is_some_and(|plan| plan.conversation.has_context_in_system_message());
    let mut commands = if skip_config_context {
        Vec::new()
    } else {
        parse_context_commands(Some(&Value::Array(config.context_commands.clone())))?
    };
    commands.extend(cli_commands(&args.exec));
    let prompt = inject_context(&prompt, &commands, &variables, None).await?;

    let schema = match select_source(
        args.json_schema.as_deref(),
        args.json_schema_file.as_deref(),
        config,
    ) {
        Some(source) => Some(SchemaLoader::new(locations).load(&source).await?),
        None => None,
    };

    let mut messages = match &conversation {
        Some(plan) => plan.conversation.messages.clone(),
        None => config
            .default_system_message
            .iter()
            .filter(|text| !text.is_empty())
            .map(|text| ChatMessage::system(text.as_str()))
            .collect(),
    };
    messages.push(match &args.image {
        Some(source) => ChatMessage::user_with_image(prompt, image_url_for(source)?),
        None => ChatMessage::user(prompt),
    });

    let mut request = CompletionRequest::new(config.model(), messages);
    request.temperature = config.temperature;
    request.max_tokens = config.max_tokens;
    request.response_format = schema.as_ref().map(response_format);
    request.extra = config.extra.clone();
    request.api_base = config.api_base.clone();
    request.options = RequestOptions {
        timeout_secs: config.timeout,
        retries: config.num_retries.unwrap_or(0),
        ..RequestOptions::default()
    };

    let agent = if args.allow_commands || config.allow_dynamic_commands {
        Some(AgentPlan {
            policy: CommandPolicy::from_config(config.dynamic_commands.as_ref())?,
            verbose: args.verbose,
            confirm: args.confirm,
        })
    } else {
        None
    };

    Ok(Prepared {
        request,
        stream: config.stream,
        raw: config.raw_response,
        schema,
        fallbacks: config.fallbacks.clone(),
        agent,
        conversation,
    })
}

/// JSON description of the request `--dry-run` would send.
pub fn dry_run_report(prepared: &Prepared) -> Value {
    let mut request = prepared.request.clone();
    if let Some(plan) = &prepared.agent {
        request.tools = vec![agent::command_tool(&plan.policy).to_json()];
        request.tool_choice = Some(json!("auto"));
    }
    let stream = prepared.stream && prepared.agent.is_none() && prepared.schema.is_none();
    let route = request.route();
    let body = request.to_body(stream);

    json!({
        "dry_run": true,
        "provider": route.provider.as_str(),
        "model": route.model,
        "endpoint": route.endpoint(request.api_base.as_deref(), CHAT_COMPLETIONS_PATH),
        "api_key_present": is_api_key_present(route.provider),
        "stream": stream,
        "agent_mode": prepared.agent.is_some(),
        "fallbacks": prepared.fallbacks,
        "conversation": prepared.conversation.as_ref().map(|plan| plan.conversation.id.clone()),
        "messages": body["messages"].clone(),
        "request": body,
    })
}

fn render_content(content: &str, schema: Option<&Value>) -> Result<String, CliError> {
    let Some(schema) = schema else {
        return Ok(content.to_string());
    };
    let value = parse_and_validate(content, schema)?;
    serde_json::to_string_pretty(&value).map_err(|err| CliError::Usage(err.to_string()))
}

/// Sends the prepared request and writes the answer to `out`.
pub async fn execute(
    prepared: Prepared,
    backend: &dyn ChatBackend,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    let Prepared {
        request,
        stream,
        raw,
        schema,
        fallbacks,
        agent: agent_plan,
        conversation,
    } = prepared;
    let provider = request.route().provider;

    let (content, usage): (String, Option<Usage>) = if let Some(plan) = agent_plan {
        if stream {
            eprintln!("Warning: Streaming is not supported with dynamic commands. Using non-streaming mode.");
        }
        if raw {
            eprintln!("Warning: Raw response output is not supported with dynamic commands. Showing the final answer only.");
        }
        let mut terminal = TerminalConfirm;
        let options = AgentOptions {
            policy: plan.policy,
            verbose: plan.verbose,
            confirm: if plan.confirm {
                Some(&mut terminal as &mut dyn Confirm)
            } else {
                None
            },
            fallbacks,
        };
        let outcome = agent::run_agent(backend, request.clone(), options).await?;
        if plan.verbose {
            eprintln!("[Commands executed: {}]", outcome.commands_executed);
        }
        write_out(out, &render_content(&outcome.content, schema.as_ref())?)?;
        (outcome.content, Some(outcome.usage))
    } else if stream && schema.is_none() {
        if raw {
            eprintln!("Warning: Raw response output is not supported with streaming. Streaming text instead.");
        }
        let mut write_error: Option<io::Error> = None;
        let response = {
            let mut sink = |delta: &str| match out
                .write_all(delta.as_bytes())
                .and_then(|()| out.flush())
            {
                Ok(()) => ControlFlow::Continue(()),
                Err(err) => {
                    write_error = Some(err);
                    ControlFlow::Break(())
                }
            };
            backend.stream(&request, &mut sink).await?
        };
        if let Some(err) = write_error {
            return Err(CliError::io("write output")(err));
        }
        writeln!(out).map_err(CliError::io("write output"))?;
        (response.content.unwrap_or_default(), response.usage)
    } else {
        if stream && schema.is_some() {
            tracing::warn!("streaming disabled because a JSON schema is set");
        }
        let response = complete_with_fallbacks(backend, &request, &fallbacks).await?;
        if raw {
            let rendered = serde_json::to_string_pretty(&response.raw)
                .map_err(|err| CliError::Usage(err.to_string()))?;
            write_out(out, &rendered)?;
            (response.content.unwrap_or_default(), response.usage)
        } else {
            let content = response
                .content
                .ok_or(ProviderError::EmptyResponse { provider })?;
            write_out(out, &render_content(&content, schema.as_ref())?)?;
            (content, response.usage)
        }
    };

    if let Some(mut plan) = conversation {
        if plan.read_only {
            return Ok(());
        }
        if let Some(user) = request.messages.last().cloned() {
            plan.conversation.add_message(user);
        }
        plan.conversation.add_message(ChatMessage::assistant(content));
        plan.conversation.record_usage(usage.as_ref());
        plan.store.save(&plan.conversation)?;
        tracing::info!(id = %plan.conversation.id, "conversation saved");
    }
    Ok(())
}

fn init_logging(log: &LogArgs, config: &Cllmfile) -> Result<(), CliError> {
    let from_config = LogSettings::from_config(
        Some(config.debug),
        Some(config.json_logs),
        config.log_file.as_deref(),
    );
    logging::init(&LogSettings::resolve(log.settings(), from_config)).map_err(CliError::Usage)
}

pub async fn run(args: AskArgs, log: &LogArgs) -> Result<(), CliError> {
    let locations = ConfigLocations::from_env(args.cllm_path.as_deref())?;
    let file_config = locations.load_config(args.config.as_deref())?;
    let merged = effective_config(&args, &file_config);
    let config = Cllmfile::from_map(&merged)?;
    init_logging(log, &config)?;

    let mut out = io::stdout();
    if args.show_config {
        return show_config(&locations, args.config.as_deref(), &merged, &mut out);
    }
    if args.list_models {
        return write_out(&mut out, render_model_list(KNOWN_MODELS).trim_end());
    }
    if args.validate_schema {
        let source = select_source(
            args.json_schema.as_deref(),
            args.json_schema_file.as_deref(),
            &config,
        )
        .ok_or(SchemaError::Missing)?;
        let schema = SchemaLoader::new(&locations).load(&source).await?;
        return write_out(&mut out, &describe_schema(&schema));
    }

    let uses_template = args.template.is_some() || config.prompt_template.is_some();
    let stdin = if args.prompt.as_deref().is_none_or(str::is_empty) || uses_template {
        read_piped_stdin()?
    } else {
        None
    };
    let env_vars: HashMap<String, String> = env::vars().collect();
    let prepared = prepare(&args, &locations, &config, stdin, &env_vars).await?;

    if args.dry_run {
        let report = serde_json::to_string_pretty(&dry_run_report(&prepared))
            .map_err(|err| CliError::Usage(err.to_string()))?;
        return write_out(&mut out, &report);
    }

    let backend = HttpBackend::new();
    execute(prepared, &backend, &mut out).await
}
