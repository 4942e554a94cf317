//! `agentlab logs`: sandbox event stream.

use anyhow::Result;
use tracing::debug;

use super::AppContext;
use crate::cli::LogsArgs;
use crate::hints::wrap_sandbox_not_found;
use crate::tail::{SandboxEvents, TailOptions, format_event, run_tail};
use crate::transport::ApiError;

pub async fn logs(app: &AppContext, args: LogsArgs) -> Result<()> {
    let client = app.api()?;
    let source = SandboxEvents {
        client: &client,
        vmid: args.vmid,
    };
    let opts = TailOptions::new(args.tail.tail, args.tail.limit, args.tail.follow);
    let result = run_tail(&source, &app.ctx, opts, |event| {
        if app.is_json() {
            app.out.json_line(event)
        } else {
            println!("{}", format_event(event));
            Ok(())
        }
    })
    .await;

    match result {
        Ok(cursor) => {
            debug!("logs for {} ended at {:?}", args.vmid, cursor.position());
            Ok(())
        }
        Err(e) => match e.downcast::<ApiError>() {
            Ok(api) => Err(wrap_sandbox_not_found(&client, &app.ctx, args.vmid, api).await),
            Err(other) => Err(other),
        },
    }
}
