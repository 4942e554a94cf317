//! `agentlab profile`.

use agentlab_common::protocol::ProfilesResponse;
use anyhow::Result;

use super::AppContext;
use crate::cli::ProfileCommand;
use crate::output::{Table, format_timestamp, or_dash};

pub async fn run(app: &AppContext, cmd: ProfileCommand) -> Result<()> {
    match cmd {
        ProfileCommand::List => list(app).await,
    }
}

async fn list(app: &AppContext) -> Result<()> {
    let client = app.api()?;
    let resp: ProfilesResponse = client.get(&app.ctx, "/v1/profiles").await?;
    app.out.render(&resp, || {
        if resp.profiles.is_empty() {
            println!("no profiles");
            return;
        }
        let mut table = Table::new(["NAME", "TEMPLATE", "UPDATED"]);
        for p in &resp.profiles {
            table.row([
                p.name.clone(),
                or_dash(p.template_vmid),
                format_timestamp(p.updated_at.as_deref()),
            ]);
        }
        table.print();
    })
}
