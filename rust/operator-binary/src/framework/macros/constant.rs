/// Defines a lazily parsed static of a restricted string type.
///
/// The literal is converted with [`std::str::FromStr::from_str`] on first access, so it must be
/// valid for the given type.
///
/// # Examples
///
/// ```rust
/// constant!(LFME_NAMESPACE: NamespaceName = "openshift-logging");
/// constant!(pub COLLECTOR_COMPONENT: ComponentName = "collector");
/// ```
#[macro_export(local_inner_macros)]
macro_rules! constant {
    ($qualifier:vis $name:ident: $type:ident = $value:literal) => {
        $qualifier static $name: std::sync::LazyLock<$type> = std::sync::LazyLock::new(|| {
            <$type as std::str::FromStr>::from_str($value)
                .expect(std::concat!("should be a valid ", std::stringify!($type)))
        });
    };
}
