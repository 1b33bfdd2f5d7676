//! `enclave resolve`.

use anyhow::Context;
use clap::Args;
use enclave_core::{ComponentKind, ComponentName, PackageName, QueryFlags, UserId};
use enclave_pm::{ComponentDecl, PackageManager, RoutingRequest};

use crate::theme::Theme;

/// Arguments for `enclave resolve`.
#[derive(Debug, Args)]
pub(crate) struct ResolveArgs {
    /// Component kind: activity, service, receiver or provider
    pub(crate) kind: ComponentKind,

    /// Request action
    #[arg(long)]
    pub(crate) action: Option<String>,

    /// Request category (repeatable)
    #[arg(long = "category")]
    pub(crate) categories: Vec<String>,

    /// Data scheme
    #[arg(long)]
    pub(crate) scheme: Option<String>,

    /// MIME type
    #[arg(long = "type")]
    pub(crate) mime_type: Option<String>,

    /// Explicit target as `pkg/class`
    #[arg(long)]
    pub(crate) component: Option<String>,

    /// Restrict matching to one package
    #[arg(long)]
    pub(crate) package: Option<String>,

    /// User to resolve for
    #[arg(short, long, default_value_t = 0)]
    pub(crate) user: i32,

    /// List every match in rank order instead of picking one
    #[arg(long)]
    pub(crate) all: bool,
}

impl ResolveArgs {
    pub(crate) fn request(&self) -> anyhow::Result<RoutingRequest> {
        let mut request = RoutingRequest::default();
        if let Some(component) = &self.component {
            let name: ComponentName = component
                .parse()
                .with_context(|| format!("invalid component '{component}'"))?;
            request.component = Some(name);
        }
        if let Some(package) = &self.package {
            request.package = Some(PackageName::parse(package).context("invalid package name")?);
        }
        request.action.clone_from(&self.action);
        request.categories = self.categories.iter().cloned().collect();
        request.scheme.clone_from(&self.scheme);
        request.mime_type.clone_from(&self.mime_type);
        Ok(request)
    }
}

pub(crate) fn run(pm: &PackageManager, args: &ResolveArgs) -> anyhow::Result<()> {
    let request = args.request()?;
    let user = UserId(args.user);
    let flags = QueryFlags::empty();

    if args.all {
        let matches = pm.query_components(args.kind, &request, flags, user);
        if matches.is_empty() {
            println!("{}", Theme::info("No matching component"));
            return Ok(());
        }
        println!("{}", Theme::header(&format!("{} match(es)", matches.len())));
        for c in &matches {
            println!("{}", describe(c));
        }
        return Ok(());
    }

    if let Some(c) = pm.resolve_component(args.kind, &request, flags, user) {
        println!("{}", Theme::success(&c.name.to_string()));
        return Ok(());
    }

    let candidates = pm.query_components(args.kind, &request, flags, user);
    if candidates.is_empty() {
        println!("{}", Theme::info("No matching component"));
    } else {
        println!(
            "{}",
            Theme::warning(&format!(
                "Ambiguous: {} candidates tie; pass --component to choose",
                candidates.len()
            ))
        );
        for c in &candidates {
            println!("{}", describe(c));
        }
    }
    Ok(())
}

fn describe(c: &ComponentDecl) -> String {
    format!(
        "  {} {}",
        c.name,
        Theme::dimmed(&format!(
            "priority={} order={} default={}",
            c.priority, c.preferred_order, c.is_default
        ))
    )
}
