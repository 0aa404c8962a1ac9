pub mod classifier;
pub mod resolver;

pub use classifier::{AddressScope, DestinationClassifier};
pub use resolver::{
    Destination, FailPolicy, HostResolver, PrivateNetworkResolver, StaticResolver, SystemResolver,
    Unclassified, extract_host,
};
