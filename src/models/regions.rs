use crate::models::Cloud;
use once_cell::sync::Lazy;
use std::collections::HashSet;

static AWS_REGIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "us-east-1",
        "us-east-2",
        "us-west-1",
        "us-west-2",
        "ca-central-1",
        "sa-east-1",
        "eu-central-1",
        "eu-west-1",
        "eu-west-2",
        "eu-west-3",
        "eu-north-1",
        "ap-south-1",
        "ap-northeast-1",
        "ap-northeast-2",
        "ap-northeast-3",
        "ap-southeast-1",
        "ap-southeast-2",
        "ap-southeast-3",
    ])
});

static AZURE_REGIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "eastus",
        "eastus2",
        "centralus",
        "northcentralus",
        "southcentralus",
        "westcentralus",
        "westus",
        "westus2",
        "westus3",
        "canadacentral",
        "canadaeast",
        "brazilsouth",
        "northeurope",
        "westeurope",
        "uksouth",
        "ukwest",
        "francecentral",
        "germanywestcentral",
        "norwayeast",
        "swedencentral",
        "switzerlandnorth",
        "uaenorth",
        "southafricanorth",
        "centralindia",
        "southindia",
        "westindia",
        "eastasia",
        "southeastasia",
        "japaneast",
        "japanwest",
        "koreacentral",
        "koreasouth",
        "australiaeast",
        "australiasoutheast",
        "qatarcentral",
    ])
});

static GOOGLE_REGIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "us-central1",
        "us-east1",
        "us-east4",
        "us-west1",
        "us-west2",
        "us-west3",
        "us-west4",
        "northamerica-northeast1",
        "southamerica-east1",
        "europe-north1",
        "europe-west1",
        "europe-west2",
        "europe-west3",
        "europe-west4",
        "europe-west6",
        "asia-east1",
        "asia-east2",
        "asia-northeast1",
        "asia-northeast2",
        "asia-northeast3",
        "asia-south1",
        "asia-southeast1",
        "asia-southeast2",
        "australia-southeast1",
    ])
});

pub fn regions_of_cloud(cloud: Cloud) -> &'static HashSet<&'static str> {
    static EMPTY: Lazy<HashSet<&'static str>> = Lazy::new(HashSet::new);
    match cloud {
        Cloud::Aws => &AWS_REGIONS,
        Cloud::Azure => &AZURE_REGIONS,
        Cloud::Google => &GOOGLE_REGIONS,
        Cloud::Kubernetes => &EMPTY,
    }
}

pub fn is_known_region(cloud: Cloud, region: &str) -> bool {
    regions_of_cloud(cloud).contains(region)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_regions_per_cloud() {
        assert!(is_known_region(Cloud::Aws, "eu-west-1"));
        assert!(is_known_region(Cloud::Azure, "westeurope"));
        assert!(is_known_region(Cloud::Google, "us-central1"));
        assert!(!is_known_region(Cloud::Aws, "westeurope"));
        assert!(!is_known_region(Cloud::Kubernetes, "eu-west-1"));
    }
}
