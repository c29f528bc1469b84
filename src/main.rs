use std::{path::Path, process::ExitCode, sync::Arc, time::Duration};

use moodfeed::{
    application::{
        affinity::{AffinityConfig, AffinityRegistry, RefreshOutcome},
        engagement::{EngagementEvent, EngagementRecorder},
        error::AppError,
        feed::{FeedConfig, FeedMode, FeedSelector},
        ranking::{FeedQuery, FeedService},
        read_through::CachedReader,
        scoring::ScoringEngine,
        sources::PageRequest,
    },
    cache::{
        CacheConfig, CacheRegistry, ClientCacheConfig, PersistentClientCache, install_client_cache,
    },
    config,
    domain::{AffinityProfile, ContentItem, DomainError},
    infra::{dataset::JsonDataset, error::InfraError, storage::FileStorage, telemetry},
};
use serde::Serialize;
use time::{Date, OffsetDateTime, format_description::well_known::Rfc3339, macros::format_description};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report_application_error(&error);
            ExitCode::from(error.exit_code())
        }
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;

    telemetry::init(&settings.logging)?;
    let app = ApplicationContext::build(&settings)?;

    match cli_args.command {
        config::Command::Rank(args) => run_rank(&app, args).await,
        config::Command::Record(args) => run_record(&app, args).await,
        config::Command::Profile(args) => run_profile(&app, args.command).await,
        config::Command::ClientCache(args) => run_client_cache(&app, args.command).await,
    }
}

struct ApplicationContext {
    cache: Arc<CacheRegistry>,
    client_cache: Arc<PersistentClientCache>,
    profiles: Arc<AffinityRegistry>,
    selector: FeedSelector,
}

impl ApplicationContext {
    fn build(settings: &config::Settings) -> Result<Self, AppError> {
        let storage = Arc::new(
            FileStorage::new(&settings.storage.data_dir).map_err(InfraError::from)?,
        );

        let cache = Arc::new(CacheRegistry::new(CacheConfig::from(&settings.cache)));
        CacheRegistry::install(cache.clone());

        let client_cache = Arc::new(PersistentClientCache::new(
            storage.clone(),
            ClientCacheConfig::from(&settings.client_cache),
        ));
        install_client_cache(client_cache.clone());

        let profiles = Arc::new(AffinityRegistry::new(
            storage,
            AffinityConfig::from(&settings.affinity),
        ));
        let selector = FeedSelector::new(FeedConfig::from(&settings.feed), ScoringEngine::default());

        info!(
            data_dir = %settings.storage.data_dir.display(),
            cache_enabled = settings.cache.enabled,
            "moodfeed initialised"
        );

        Ok(Self {
            cache,
            client_cache,
            profiles,
            selector,
        })
    }
}

async fn load_dataset(path: &Path) -> Result<Arc<JsonDataset>, AppError> {
    Ok(Arc::new(JsonDataset::load(path).await?))
}

fn parse_now(value: Option<&str>) -> Result<OffsetDateTime, AppError> {
    match value {
        Some(raw) => OffsetDateTime::parse(raw, &Rfc3339)
            .map_err(|err| AppError::validation(format!("invalid --now `{raw}`: {err}"))),
        None => Ok(OffsetDateTime::now_utc()),
    }
}

fn parse_day(value: Option<&str>) -> Result<Date, AppError> {
    match value {
        Some(raw) => Date::parse(raw, format_description!("[year]-[month]-[day]"))
            .map_err(|err| AppError::validation(format!("invalid date `{raw}`: {err}"))),
        None => Ok(OffsetDateTime::now_utc().date()),
    }
}

fn view_duration(seconds: f64) -> Result<Duration, AppError> {
    Duration::try_from_secs_f64(seconds).map_err(|err| {
        AppError::validation(format!("--seconds must be a non-negative duration: {err}"))
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{out}");
    Ok(())
}

#[derive(Serialize)]
struct RankedRow<'a> {
    id: i64,
    author_id: i64,
    categories: Vec<&'a str>,
    created_at: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
}

async fn run_rank(app: &ApplicationContext, args: config::RankArgs) -> Result<(), AppError> {
    let dataset = load_dataset(&args.dataset.dataset).await?;
    let mode: FeedMode = args.mode.parse()?;
    let now = parse_now(args.now.as_deref())?;

    let profile = match args.viewer {
        Some(viewer) => {
            let store = app.profiles.for_user(viewer);
            if args.refresh_profile {
                match store
                    .refresh(dataset.as_ref(), dataset.as_ref(), now.date())
                    .await
                {
                    RefreshOutcome::Applied(profile) | RefreshOutcome::StatsUnavailable(profile) => {
                        profile
                    }
                    RefreshOutcome::Discarded => store.load().await,
                }
            } else {
                store.load().await
            }
        }
        None => AffinityProfile::new(),
    };

    let service = FeedService::new(
        dataset.clone(),
        CachedReader::new(app.cache.server().clone()),
        app.selector.clone(),
    );
    let query = FeedQuery {
        mode,
        viewer: args.viewer,
        page: PageRequest::new(args.page, args.limit),
        recent_categories: &args.recent,
        profile: &profile,
        now,
    };
    let page = service.feed(&query).await?;

    let scoring = app.selector.scoring();
    let rows: Vec<RankedRow<'_>> = page
        .items
        .iter()
        .map(|item: &ContentItem| RankedRow {
            id: item.id,
            author_id: item.author_id,
            categories: item.category_labels().collect(),
            created_at: &item.created_at,
            score: args.scores.then(|| match mode {
                FeedMode::Trending => scoring.popularity_score(item, now),
                _ => scoring.affinity_score(item, &profile, now),
            }),
        })
        .collect();

    info!(mode = %mode, returned = rows.len(), has_more = page.has_more, "Feed ranked");
    print_json(&serde_json::json!({
        "mode": mode,
        "has_more": page.has_more,
        "items": rows,
    }))
}

async fn run_record(app: &ApplicationContext, args: config::RecordArgs) -> Result<(), AppError> {
    let dataset = load_dataset(&args.dataset.dataset).await?;
    let item = dataset
        .item(args.item)
        .cloned()
        .ok_or_else(|| DomainError::unknown("item", args.item.to_string()))?;

    let event = match args.signal {
        config::SignalArg::View => EngagementEvent::Viewed {
            item,
            duration: view_duration(args.seconds)?,
        },
        config::SignalArg::Endorse => EngagementEvent::Endorsed { item },
        config::SignalArg::Save => EngagementEvent::Saved { item },
    };

    let recorder = EngagementRecorder::new(app.profiles.clone(), app.cache.trigger().clone());
    let recorded = recorder.record(args.user, event).await;

    let store = app.profiles.for_user(args.user);
    store.flush().await?;
    print_json(&serde_json::json!({
        "recorded": recorded,
        "profile": store.snapshot(),
    }))
}

async fn run_profile(
    app: &ApplicationContext,
    command: config::ProfileCommand,
) -> Result<(), AppError> {
    match command {
        config::ProfileCommand::Show(args) => {
            let profile = app.profiles.for_user(args.user).load().await;
            print_json(&serde_json::json!({
                "user": args.user,
                "top_categories": profile.top_categories(5),
                "profile": profile,
            }))
        }
        config::ProfileCommand::Reset(args) => {
            app.profiles.logout(args.user).await?;
            print_json(&serde_json::json!({ "user": args.user, "reset": true }))
        }
        config::ProfileCommand::Refresh(args) => {
            let dataset = load_dataset(&args.dataset.dataset).await?;
            let today = parse_day(args.today.as_deref())?;
            let outcome = app
                .profiles
                .for_user(args.user)
                .refresh(dataset.as_ref(), dataset.as_ref(), today)
                .await;
            let (status, profile) = match outcome {
                RefreshOutcome::Applied(profile) => ("applied", Some(profile)),
                RefreshOutcome::StatsUnavailable(profile) => ("stats_unavailable", Some(profile)),
                RefreshOutcome::Discarded => ("discarded", None),
            };
            print_json(&serde_json::json!({
                "user": args.user,
                "status": status,
                "profile": profile,
            }))
        }
    }
}

async fn run_client_cache(
    app: &ApplicationContext,
    command: config::ClientCacheCommand,
) -> Result<(), AppError> {
    let cache = &app.client_cache;
    match command {
        config::ClientCacheCommand::Size => {
            print_json(&serde_json::json!({ "bytes": cache.size().await }))
        }
        config::ClientCacheCommand::Clear => {
            print_json(&serde_json::json!({ "removed": cache.clear().await }))
        }
        config::ClientCacheCommand::Purge { fragment } => {
            let removed = cache.remove_by_pattern(&fragment).await;
            print_json(&serde_json::json!({ "fragment": fragment, "removed": removed }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_duration_rejects_out_of_range_seconds() {
        assert_eq!(view_duration(2.5).expect("in range"), Duration::from_millis(2_500));
        for seconds in [-1.0, f64::NAN, f64::INFINITY, 1e300] {
            assert!(matches!(view_duration(seconds), Err(AppError::Validation(_))));
        }
    }
}
