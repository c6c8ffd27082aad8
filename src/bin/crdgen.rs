use kube::CustomResourceExt;

fn main() {
    print!(
        "{}",
        serde_yaml::to_string(&common_service_operator::resources::commonservices::CommonService::crd())
            .unwrap()
    )
}
