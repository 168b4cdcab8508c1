use rowforge_runtime::ProviderRegistry;

fn main() {
    let registry = ProviderRegistry::new();
    for id in registry.ids() {
        println!("{id}");
    }
}
