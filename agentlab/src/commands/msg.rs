//! `agentlab msg`: scoped message board.

use agentlab_common::Message;
use agentlab_common::protocol::MessageCreateRequest;
use anyhow::Result;

use super::AppContext;
use crate::cli::{MsgCommand, ScopeArgs, TailArgs};
use crate::hints::{wrap_job_not_found, wrap_session_not_found, wrap_workspace_not_found};
use crate::tail::{ScopedMessages, TailOptions, format_message, run_tail};
use crate::transport::ApiError;

pub async fn run(app: &AppContext, cmd: MsgCommand) -> Result<()> {
    match cmd {
        MsgCommand::Post {
            scope,
            author,
            kind,
            text,
        } => post(app, &scope, author, kind, text).await,
        MsgCommand::Tail { scope, tail } => tail_messages(app, &scope, &tail).await,
    }
}

fn scope_not_found(scope_type: &str, id: &str, err: ApiError) -> anyhow::Error {
    match scope_type {
        "workspace" => wrap_workspace_not_found(id, err),
        "session" => wrap_session_not_found(id, err),
        _ => wrap_job_not_found(id, err),
    }
}

async fn post(
    app: &AppContext,
    scope: &ScopeArgs,
    author: Option<String>,
    kind: Option<String>,
    text: String,
) -> Result<()> {
    let (scope_type, scope_id) = scope.scope();
    let request = MessageCreateRequest {
        scope_type: scope_type.to_string(),
        scope_id: scope_id.clone(),
        author: author.filter(|a| !a.trim().is_empty()),
        kind: kind.filter(|k| !k.trim().is_empty()),
        text,
        payload: None,
    };
    let client = app.api()?;
    let message: Message = client
        .post(&app.ctx, "/v1/messages", &request)
        .await
        .map_err(|e| scope_not_found(scope_type, &scope_id, e))?;
    app.out.render(&message, || {
        println!("posted message {} to {scope_type} {scope_id}", message.id)
    })
}

async fn tail_messages(app: &AppContext, scope: &ScopeArgs, args: &TailArgs) -> Result<()> {
    let (scope_type, scope_id) = scope.scope();
    let client = app.api()?;
    let source = ScopedMessages {
        client: &client,
        scope_type,
        scope_id: scope_id.clone(),
    };
    let opts = TailOptions::new(args.tail, args.limit, args.follow);
    let result = run_tail(&source, &app.ctx, opts, |message| {
        if app.is_json() {
            app.out.json_line(message)
        } else {
            println!("{}", format_message(message));
            Ok(())
        }
    })
    .await;
    match result {
        Ok(_) => Ok(()),
        Err(e) => match e.downcast::<ApiError>() {
            Ok(api) => Err(scope_not_found(scope_type, &scope_id, api)),
            Err(other) => Err(other),
        },
    }
}
