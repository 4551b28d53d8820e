//! Minimal host shell: wires a component registry and the in-memory history
//! into a router, then drives a few navigations and prints what happened.

use lumen_router::prelude::*;
use std::sync::Arc;

struct Page(&'static str);

#[async_trait]
impl RouteComponent for Page {
    async fn load(
        &self,
        params: &Params,
        _next: &RouteNode,
        _current: Option<&RouteNode>,
    ) -> RouterResult<()> {
        match params.get("id") {
            Some(id) => println!("  loaded {} (id={id})", self.0),
            None => println!("  loaded {}", self.0),
        }
        Ok(())
    }
}

struct Gate;

#[async_trait]
impl RouteComponent for Gate {
    async fn can_load(
        &self,
        _params: &Params,
        _next: &RouteNode,
        _current: Option<&RouteNode>,
    ) -> RouterResult<CanLoadResult> {
        println!("  gate: not signed in, redirecting to login");
        Ok(CanLoadResult::Redirect("login".into()))
    }
}

fn page(name: &'static str) -> Arc<ComponentDefinition> {
    ComponentDefinition::simple(name, move || {
        let instance: Arc<dyn RouteComponent> = Arc::new(Page(name));
        instance
    })
}

#[tokio::main]
async fn main() -> RouterResult<()> {
    tracing_subscriber::fmt::init();

    let registry = ComponentRegistry::new();
    registry.register(page("home"));
    registry.register(page("login"));
    registry.register(ComponentDefinition::new(
        "product",
        RouteConfig::new()
            .with_path("products/:id")
            .with_title("Product"),
        || {
            let instance: Arc<dyn RouteComponent> = Arc::new(Page("product"));
            instance
        },
    ));
    registry.register(ComponentDefinition::simple("account", || {
        let instance: Arc<dyn RouteComponent> = Arc::new(Gate);
        instance
    }));

    let shell = ComponentDefinition::new(
        "nav-shell",
        RouteConfig::new().with_routes([
            Routeable::redirect("", "home"),
            Routeable::component("home"),
            Routeable::component("product"),
            Routeable::component("account"),
            Routeable::component("login"),
        ]),
        || {
            let instance: Arc<dyn RouteComponent> = Arc::new(Page("nav-shell"));
            instance
        },
    );

    let location = MemoryLocationManager::new();
    let location_dyn: Arc<dyn LocationManager> = location.clone();
    let router = Router::new(registry, location_dyn, RouterOptions::default())?;

    let _events = router.events().subscribe(|event| {
        println!("  event: {}", event.name());
    });

    router.start(shell, false).await?;
    router.root_context()?.register_viewport(Viewport::default());

    println!("→ load /");
    router.load("/", None).await?;

    println!("→ load products/42");
    router.load("products/42", None).await?;
    println!("  title: {}", router.current_title());
    println!("  location: {}", location.get_path());

    println!("→ load account (guarded)");
    router.load("account", None).await?;
    println!("  landed on login: {}", router.is_active("login", None)?);

    println!("→ back");
    location.go(-1);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    println!("  location: {}", location.get_path());
    println!("  product active: {}", router.is_active("products/42", None)?);

    Ok(())
}
